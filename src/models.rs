use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Envelope for list responses.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DataResponse<T> {
    pub data: T,
}
