//! Secret encryption, CA/certificate issuance and message signing
//! (spec.md §4.B, §4.D, §4.H).

pub mod ca;
pub mod cipher;
pub mod sign;

pub use ca::{CaKeypair, IssuedCertificate};
pub use cipher::SecretCipher;
pub use sign::{MessageSigner, MessageVerifyingKey};
