//! Tamper detection for client-held query requests.
//!
//! The canonical message is every condition's key and value in map order,
//! then the sort string, the offset, a `|` separator, the limit and finally
//! the salt. The digest is lowercase hex MD5 so that browser clients can
//! reproduce it with stock libraries.

use crate::error::{QueryError, Result};
use crate::request::QueryRequest;

/// Built-in salt shared by servers and clients unless configured otherwise.
pub const DEFAULT_SALT: &str = "Q7f!kz0#predicate-salt";

const OFFSET_LIMIT_SEPARATOR: char = '|';

#[derive(Clone)]
pub struct SignatureGuard {
    salt: String,
    dev_mode: bool,
}

impl std::fmt::Debug for SignatureGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureGuard")
            .field("salt", &"<redacted>")
            .field("dev_mode", &self.dev_mode)
            .finish()
    }
}

impl Default for SignatureGuard {
    fn default() -> Self {
        Self::new(DEFAULT_SALT)
    }
}

impl SignatureGuard {
    pub fn new(salt: impl Into<String>) -> Self {
        Self {
            salt: salt.into(),
            dev_mode: false,
        }
    }

    /// A guard that never rejects; for local development only.
    pub fn dev() -> Self {
        Self::default().with_dev_mode(true)
    }

    pub fn with_dev_mode(mut self, dev_mode: bool) -> Self {
        self.dev_mode = dev_mode;
        self
    }

    pub fn is_dev_mode(&self) -> bool {
        self.dev_mode
    }

    pub fn canonical_message(&self, req: &QueryRequest) -> String {
        let mut msg = String::new();
        for (k, v) in &req.conditions {
            msg.push_str(k);
            msg.push_str(v);
        }
        msg.push_str(&req.sort);
        msg.push_str(&req.offset.to_string());
        msg.push(OFFSET_LIMIT_SEPARATOR);
        msg.push_str(&req.limit.to_string());
        msg.push_str(&self.salt);
        msg
    }

    pub fn sign(&self, req: &QueryRequest) -> String {
        format!("{:x}", md5::compute(self.canonical_message(req)))
    }

    /// Compare `supplied` against the expected digest without short-circuiting.
    pub fn verify(&self, req: &QueryRequest, supplied: &str) -> bool {
        let expected = self.sign(req);
        let (a, b) = (expected.as_bytes(), supplied.trim().to_ascii_lowercase());
        let b = b.as_bytes();
        a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
    }

    /// Enforce the request's own signature. Skipped in development mode.
    pub fn check(&self, req: &QueryRequest) -> Result<()> {
        if self.dev_mode {
            return Ok(());
        }
        let ok = req
            .signature
            .as_deref()
            .is_some_and(|sig| self.verify(req, sig));
        if ok {
            Ok(())
        } else {
            tracing::warn!(entity = %req.entity, "query request signature rejected");
            Err(QueryError::SignatureMismatch)
        }
    }
}
