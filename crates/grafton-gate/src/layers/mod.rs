//! The standard layers, in chain order.

mod execution;
mod lookup;
mod policy;
mod validation;

pub use execution::ExecutionLayer;
pub use policy::PolicyLayer;
pub use validation::ValidationLayer;

use crate::context::RequestContext;
use crate::error::{ChainError, ChainResult};
use crate::handler::Operation;

/// The administrator never writes records or grafts.
///
/// Both the validation and the policy layer run this first, so the rejection
/// holds even for compositions that bypass validation.
pub(crate) fn guard_admin_write(admin: &str, ctx: &RequestContext, operation: Operation) -> ChainResult<()> {
    if operation.is_data_write() && ctx.caller().is(admin) {
        tracing::warn!(%operation, "administrator attempted a record write");
        return Err(ChainError::Forbidden(format!(
            "{operation} is not available to the administrator"
        )));
    }
    Ok(())
}
