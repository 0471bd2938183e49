//! Error taxonomy of the training protocol.
//!
//! Every failure here is fatal for a run: the orchestrating caller receives it wrapped in an
//! [anyhow::Error] and nothing is retried, since a retry would replay a tag.
//! Use [anyhow::Error::downcast_ref] to recover the concrete kind.

use thiserror::Error;

/// Errors of the homomorphic encryption layer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CryptoError {
    /// `KeyError`: decryption attempted by a party that holds no private key.
    #[error("no private key installed, only the arbiter can decrypt")]
    NoPrivateKey,
    /// Encryption or homomorphic evaluation before a public key was installed.
    #[error("no public key installed")]
    NoPublicKey,
    /// Ciphertext produced under another public key.
    #[error("ciphertext belongs to key {found:016x}, installed key is {expected:016x}")]
    KeyMismatch {
        /// Fingerprint of the installed key.
        expected: u64,
        /// Fingerprint carried by the ciphertext.
        found: u64,
    },
    /// Modulus too short or even, e.g. a degenerate key received from a peer.
    #[error("public key modulus of {bits} bits is not a valid Paillier modulus")]
    InvalidPublicKey {
        /// Bit length of the received modulus.
        bits: usize,
    },
    /// Value outside of the ciphertext space of the installed key.
    #[error("value is not a valid ciphertext under the installed key")]
    InvalidCiphertext,
    /// NaN or infinity cannot be encoded.
    #[error("cannot encode non-finite value {0}")]
    NonFinite(f64),
    /// Encoded value does not fit in the plaintext space.
    #[error("encoded number overflows the plaintext space")]
    Overflow,
}

/// Dimension mismatches in gradient handling.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    /// Part sizes do not add up to the vector length.
    #[error("part sizes sum to {expected} but the vector has length {actual}")]
    SizeMismatch {
        /// Sum of the requested part sizes.
        expected: usize,
        /// Length of the vector.
        actual: usize,
    },
    /// Two vectors that must have the same length do not.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected length.
        expected: usize,
        /// Observed length.
        actual: usize,
    },
}

/// Protocol desynchronization between the three roles.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DesyncError {
    /// A frame with a name/tag the receiver did not ask for and cannot buffer.
    #[error("duplicate message {name} with tag {tag} from {peer}")]
    Duplicate {
        /// Transfer variable name.
        name: String,
        /// Tag of the frame.
        tag: String,
        /// Role on the other side.
        peer: String,
    },
    /// Inbound messages do not match what the current state waits for.
    #[error("{role} expected {expected}, got {actual}")]
    UnexpectedMessage {
        /// Receiving role.
        role: String,
        /// What the state machine waited for.
        expected: String,
        /// What it was handed.
        actual: String,
    },
    /// Payload variant does not fit the transfer variable.
    #[error("unexpected payload for {name}: expected {expected}, got {actual}")]
    UnexpectedPayload {
        /// Transfer variable name.
        name: String,
        /// Expected payload kind.
        expected: String,
        /// Received payload kind.
        actual: String,
    },
    /// A row of the current batch is unknown locally or missing from a peer's contribution.
    #[error("row {0} of the current batch is missing")]
    MissingRow(u64),
    /// Batch bookkeeping disagrees between parties.
    #[error("batch count mismatch: expected {expected}, got {actual}")]
    BatchCount {
        /// Announced batch count.
        expected: usize,
        /// Observed batch count.
        actual: usize,
    },
    /// Gradient vector of a party is empty.
    #[error("empty gradient from {0}")]
    EmptyGradient(String),
    /// Gradient vector of a party changed size between batches.
    #[error("gradient from {role} has length {actual}, expected {expected}")]
    GradientLength {
        /// Sending role.
        role: String,
        /// Expected length.
        expected: usize,
        /// Received length.
        actual: usize,
    },
    /// Frame on the wire that cannot be decoded.
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// A message for a role that has no channel.
    #[error("no channel to {0}")]
    NoChannel(String),
}

/// Configuration errors, raised before any network interaction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Unknown method name for a pluggable component.
    #[error("unsupported {kind} '{name}'")]
    UnsupportedMethod {
        /// Which component (optimizer, penalty, ...).
        kind: &'static str,
        /// The rejected name.
        name: String,
    },
    /// Parameter value out of range.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParam {
        /// Parameter name.
        name: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}
