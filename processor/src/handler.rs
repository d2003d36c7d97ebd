//! Transaction handler capability

use messaging::typed::TpProcessRequest;

use crate::context::Context;
use crate::error::ApplyError;

/// Business logic for one transaction family at one version
///
/// Implementations are supplied by the embedder and shared across worker
/// threads, so `apply` may run concurrently for different requests.
pub trait TransactionHandler: Send + Sync {
    fn family_name(&self) -> &str;

    fn version(&self) -> &str;

    /// Address prefixes this handler reads and writes
    fn namespaces(&self) -> Vec<String>;

    /// Applies one transaction.
    ///
    /// Every state access must go through `context`, which is scoped to the
    /// request's context id.
    fn apply(&self, request: &TpProcessRequest, context: &dyn Context) -> Result<(), ApplyError>;
}
