//! Constants that every federator must agree on.
//!
//! Changing any of these changes which transactions honest federators are willing to sign, so
//! they are compile-time values rather than configuration.

/// Maximum number of transfers carried by a single batch transaction.
///
/// Bounded so that the nonce marker stays a single direct push well within the standard
/// `OP_RETURN` relay limit.
pub const MAX_BATCH_SIZE: usize = 40;

/// Nonce value that is never valid for a transfer.
pub const RESERVED_NONCE: u8 = 0xff;

/// Maximum number of public keys in an `OP_CHECKMULTISIG` script.
pub const MAX_MULTISIG_KEYS: usize = 20;
