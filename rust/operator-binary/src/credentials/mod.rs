//! Generation of every piece of credential material the operator owns.
//!
//! Nothing in here talks to the object store. Callers PEM-encode certificates and
//! keys into separate secret fields.

pub mod certificate;
pub mod password;
