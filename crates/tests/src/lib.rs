//! Cross-crate integration tests

#[cfg(test)]
mod chain_integration;
