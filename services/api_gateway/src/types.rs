//! Request and response bodies of the HTTP surface

use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
pub struct LeaderboardQuery {
    pub tab: Option<String>,
}

/// Missing fields are rejected by the linker, not by deserialization.
#[derive(Debug, Default, Deserialize)]
pub struct LinkAddressBody {
    #[serde(rename = "flowAddress", default)]
    pub flow_address: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TxStatusQuery {
    pub hash: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LinkAccepted {
    #[serde(rename = "txHash")]
    pub tx_hash: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub details: Option<String>,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TxStatus {
    pub mined: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}
