//! Read-only script execution against the primary ledger's REST API

use crate::codec::{self, TaggedValue};
use crate::{metrics, Result, RuntimeError};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Executes read-only scripts and returns the decoded result value.
///
/// Failures are never retried here; retry policy belongs to the caller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScriptGateway: Send + Sync {
    async fn run_script(&self, source: &str, args: &[TaggedValue]) -> Result<TaggedValue>;
}

#[derive(Serialize)]
struct ScriptRequest {
    script: String,
    arguments: Vec<String>,
}

/// Script gateway over HTTPS
pub struct FlowRestGateway {
    http: reqwest::Client,
    base_url: String,
}

impl FlowRestGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RuntimeError::InvalidConfiguration(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Always targets the latest sealed state, never a pinned height.
    fn scripts_url(&self) -> String {
        format!("{}/v1/scripts?block_height=final", self.base_url)
    }
}

#[async_trait]
impl ScriptGateway for FlowRestGateway {
    async fn run_script(&self, source: &str, args: &[TaggedValue]) -> Result<TaggedValue> {
        let request = ScriptRequest {
            script: codec::encode_script(source),
            arguments: args
                .iter()
                .map(codec::encode_argument)
                .collect::<Result<Vec<_>>>()?,
        };

        debug!("Running script with {} arguments", args.len());
        let timer = metrics::SCRIPT_CALL_DURATION.start_timer();

        let response = self
            .http
            .post(self.scripts_url())
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        timer.observe_duration();

        if !status.is_success() {
            warn!("Script call rejected with status {}", status);
            return Err(RuntimeError::UpstreamRejected {
                status: status.as_u16(),
                body,
            });
        }

        codec::decode_response(&body).map_err(|e| {
            if let RuntimeError::Decode { reason, raw } = &e {
                warn!(reason = %reason, raw = %raw, "Undecodable script response");
            }
            e
        })
    }
}

/// The leaderboard query script and its argument list
#[derive(Debug, Clone)]
pub struct LeaderboardScript {
    contract: String,
    admin: String,
}

impl LeaderboardScript {
    pub const DEFAULT_CONTRACT: &'static str = "0x4fae0a028f1057ae";

    pub fn new(contract: impl Into<String>, admin: impl Into<String>) -> Self {
        Self {
            contract: contract.into(),
            admin: admin.into(),
        }
    }

    pub fn source(&self) -> String {
        format!(
            r"import Leaderboard from {contract}

access(all)
fun main(
  admin: Address,
  periodAlias: String?,
): [Leaderboard.ScoreRecord] {{
  if let adminRef = Leaderboard.borrowLeaderboardAdmin(admin) {{
    return adminRef.getLeaderboardByPeriodAlias(periodAlias)
  }}
  return []
}}
",
            contract = self.contract
        )
    }

    /// `periodAlias` of `None` selects the all-time board
    pub fn arguments(&self, period_alias: Option<&str>) -> Vec<TaggedValue> {
        vec![
            TaggedValue::address(self.admin.clone()),
            TaggedValue::optional(period_alias.map(TaggedValue::string)),
        ]
    }
}
