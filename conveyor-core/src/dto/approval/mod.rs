//! Approval DTOs

use serde::{Deserialize, Serialize};

use crate::domain::approval::Decision;

/// Body of `POST /approval/{id}/resolve`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveApproval {
    pub decision: Decision,
    #[serde(default)]
    pub comment: Option<String>,
}
