//! Ordered function chains and their version fingerprint.

use super::PipelineFunction;
use crate::errors::PipelineError;
use md5::{Digest, Md5};
use std::sync::Arc;

/// An immutable, ordered list of pipeline functions.
///
/// The version fingerprint is computed once at construction from each
/// function's [`PipelineFunction::fingerprint`], in order.
#[derive(Debug, Clone)]
pub struct FunctionChain {
    functions: Vec<Arc<dyn PipelineFunction>>,
    version: String,
}

impl FunctionChain {
    /// Creates a chain from functions.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::EmptyChain`] if `functions` is empty.
    pub fn new(functions: Vec<Arc<dyn PipelineFunction>>) -> Result<Self, PipelineError> {
        if functions.is_empty() {
            return Err(PipelineError::EmptyChain);
        }
        let version = fingerprint(&functions);
        Ok(Self { functions, version })
    }

    /// Starts a chain builder.
    #[must_use]
    pub fn builder() -> ChainBuilder {
        ChainBuilder::default()
    }

    /// Returns the version fingerprint.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the number of functions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Always false; chains are never empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Returns the function at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Arc<dyn PipelineFunction>> {
        self.functions.get(index)
    }

    /// Returns the function names in order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.functions.iter().map(|f| f.name()).collect()
    }

    pub(crate) fn functions(&self) -> &[Arc<dyn PipelineFunction>] {
        &self.functions
    }
}

fn fingerprint(functions: &[Arc<dyn PipelineFunction>]) -> String {
    let mut hasher = Md5::new();
    for function in functions {
        hasher.update(function.fingerprint().as_bytes());
        // Separator so ["ab", "c"] and ["a", "bc"] differ.
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// Builder for [`FunctionChain`].
#[derive(Debug, Default)]
pub struct ChainBuilder {
    functions: Vec<Arc<dyn PipelineFunction>>,
}

impl ChainBuilder {
    /// Appends a function.
    #[must_use]
    pub fn function(mut self, function: Arc<dyn PipelineFunction>) -> Self {
        self.functions.push(function);
        self
    }

    /// Builds the chain.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::EmptyChain`] if no function was added.
    pub fn build(self) -> Result<FunctionChain, PipelineError> {
        FunctionChain::new(self.functions)
    }
}
