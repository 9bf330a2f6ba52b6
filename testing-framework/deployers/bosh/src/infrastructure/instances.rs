use serde::Deserialize;
use testing_framework_core::deployment::InstanceObservation;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InstancesError {
    #[error("failed to parse bosh instances output: {source}")]
    Parse {
        #[source]
        source: serde_json::Error,
    },
    #[error("bosh instances output contains no table")]
    MissingTable,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstancesOutput {
    #[serde(default)]
    tables: Vec<InstancesTable>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstancesTable {
    #[serde(default)]
    rows: Vec<InstanceRow>,
}

#[derive(Debug, Deserialize)]
struct InstanceRow {
    instance: String,
    process_state: String,
    #[serde(default)]
    ips: String,
}

impl From<InstanceRow> for InstanceObservation {
    fn from(row: InstanceRow) -> Self {
        Self {
            instance: row.instance,
            process_state: row.process_state.into(),
            ips: row
                .ips
                .split(|c: char| c.is_whitespace() || c == ',')
                .filter(|ip| !ip.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }
}

/// Parse `bosh instances --json` output. Rows come from the first table; the
/// CLI emits one table per deployment.
pub fn parse_instances(raw: &str) -> Result<Vec<InstanceObservation>, InstancesError> {
    let output: InstancesOutput =
        serde_json::from_str(raw).map_err(|source| InstancesError::Parse { source })?;
    let table = output
        .tables
        .into_iter()
        .next()
        .ok_or(InstancesError::MissingTable)?;
    Ok(table.rows.into_iter().map(Into::into).collect())
}
