pub mod backoff;
pub mod email_normalization;
