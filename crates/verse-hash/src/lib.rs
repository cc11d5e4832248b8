//! Content fingerprints, chain links, and witness attestations for the Verse
//! authorship ledger.
//!
//! Every digest in this crate is SHA3-256 over length-prefixed fields, so two
//! different field sequences can never collide by concatenation. Keyed
//! signatures use HMAC-SHA256; witness attestations use Ed25519.
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use verse_hash::{fingerprint, BlockHash, ChainLinker, SigningSecret};
//!
//! let linker = ChainLinker::new(SigningSecret::new(vec![7u8; 32]).unwrap());
//! let now = Utc::now();
//!
//! let content = fingerprint("Ozymandias", "I met a traveller...", "author:percy", &now);
//! let block = linker.link(&content, &BlockHash::genesis(), &now, "author:percy");
//! let signature = linker.sign(&content, &block, &now);
//!
//! assert!(linker.verify_signature(&content, &block, &now, &signature));
//! ```

mod canonical;
mod fingerprint;
mod linker;
mod witness;

pub use canonical::{canonical_timestamp, BlockHash, CanonicalHasher, ContentHash, HashError};
pub use fingerprint::fingerprint;
pub use linker::{compute_block_hash, ChainLinker, SigningSecret, MIN_SECRET_LEN};
pub use witness::{keygen, verify_witness, Witness, WitnessKey};
