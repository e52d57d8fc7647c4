// Cryptographic primitives: hashing, key exchange, identity signatures.

pub mod ecdh;
pub mod hash;
pub mod identity;
