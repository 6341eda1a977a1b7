//! Output formatting for CLI results
//!
//! Three output formats:
//! - Table: human-readable tables (default)
//! - JSON: structured JSON for scripting
//! - Quiet: no output, exit codes only

use std::str::FromStr;

use chrono::{DateTime, Utc};
use comfy_table::{presets::UTF8_FULL, Table};
use serde::Serialize;

use ircdm_core::{IdentityInfo, ImportOutcome, PeerSummary, PendingKeyRequest};
use ircdm_crypto::Fingerprint;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Quiet,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            "quiet" => Ok(Self::Quiet),
            _ => Err(format!("Unknown output format: {s}")),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::Json => write!(f, "json"),
            Self::Quiet => write!(f, "quiet"),
        }
    }
}

/// JSON envelope shared by every command.
#[derive(Serialize)]
pub struct JsonResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// RFC 3339
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl<T: Serialize> JsonResponse<T> {
    pub fn success_with_command(data: T, command: &str) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_kind: None,
            timestamp: Utc::now().to_rfc3339(),
            command: Some(command.to_string()),
        }
    }
}

impl JsonResponse<()> {
    pub fn error(message: &str, kind: Option<&str>) -> Self {
        JsonResponse {
            success: false,
            data: None,
            error: Some(message.to_string()),
            error_kind: kind.map(str::to_string),
            timestamp: Utc::now().to_rfc3339(),
            command: None,
        }
    }
}

pub struct OutputFormatter {
    format: OutputFormat,
    verbose: bool,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat, verbose: bool) -> Self {
        Self { format, verbose }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn format_identity(&self, info: &IdentityInfo, nick: Option<&str>) -> String {
        match self.format {
            OutputFormat::Table => {
                let mut table = property_table();
                table.add_row(vec!["Nick", nick.unwrap_or("-")]);
                table.add_row(vec!["Fingerprint", &info.fingerprint.to_display()]);
                table.add_row(vec!["Signing Key", &info.id_pub]);
                table.add_row(vec!["Encryption Key", &info.enc_pub]);
                table.add_row(vec!["Created At", &format_time(info.created_at)]);
                table.to_string()
            }
            OutputFormat::Json => self.to_json_response(info, "identity show"),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_peers(&self, network: &str, peers: &[PeerSummary]) -> String {
        match self.format {
            OutputFormat::Table => {
                if peers.is_empty() {
                    return format!("No peer keys stored for {network}.");
                }
                let mut table = Table::new();
                table.load_preset(UTF8_FULL);
                table.set_header(vec!["Nick", "Fingerprint", "Verified", "First Seen", "Last Seen"]);
                for p in peers {
                    table.add_row(vec![
                        p.nick.clone(),
                        p.fingerprint.short(),
                        if p.verified { "yes" } else { "no" }.to_string(),
                        p.first_seen.map(format_time).unwrap_or_else(|| "-".to_string()),
                        p.last_seen.map(format_time).unwrap_or_else(|| "-".to_string()),
                    ]);
                }
                table.to_string()
            }
            OutputFormat::Json => self.to_json_response(
                &PeersOutput {
                    network,
                    peers,
                },
                "peers list",
            ),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_peer(&self, peer: &PeerSummary, network: &str) -> String {
        match self.format {
            OutputFormat::Table => {
                let mut table = property_table();
                table.add_row(vec!["Network", network]);
                table.add_row(vec!["Nick", &peer.nick]);
                table.add_row(vec!["Fingerprint", &peer.fingerprint.to_display()]);
                table.add_row(vec!["Verified", if peer.verified { "yes" } else { "no" }]);
                table.to_string()
            }
            OutputFormat::Json => self.to_json_response(peer, "peers show"),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_pending(&self, request: &PendingKeyRequest) -> String {
        match self.format {
            OutputFormat::Table => {
                let mut table = property_table();
                table.add_row(vec!["Peer", &request.peer.to_string()]);
                table.add_row(vec!["Reason", request.reason.as_str()]);
                table.add_row(vec![
                    "Stored Fingerprint",
                    &request
                        .existing_fingerprint
                        .map(|f| f.to_display())
                        .unwrap_or_else(|| "-".to_string()),
                ]);
                table.add_row(vec!["New Fingerprint", &request.new_fingerprint.to_display()]);
                table.to_string()
            }
            OutputFormat::Json => self.to_json_response(&PendingOutput::from(request), "import"),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_import(&self, outcome: &ImportOutcome) -> String {
        match outcome {
            ImportOutcome::BundleReceived(request) => self.format_pending(request),
            ImportOutcome::AlreadyTrusted(fp) => match self.format {
                OutputFormat::Table => format!("Key already trusted: {}", fp.to_display()),
                OutputFormat::Json => self.to_json_response(
                    &ComparisonOutput {
                        matches: true,
                        expected: *fp,
                        stored: Some(*fp),
                    },
                    "import",
                ),
                OutputFormat::Quiet => String::new(),
            },
            ImportOutcome::FingerprintCompared {
                matches,
                expected,
                stored,
            } => match self.format {
                OutputFormat::Table => {
                    let mut table = property_table();
                    table.add_row(vec!["Expected", &expected.to_display()]);
                    table.add_row(vec![
                        "Stored",
                        &stored.map(|f| f.to_display()).unwrap_or_else(|| "-".to_string()),
                    ]);
                    table.add_row(vec!["Match", if *matches { "yes" } else { "NO" }]);
                    table.to_string()
                }
                OutputFormat::Json => self.to_json_response(
                    &ComparisonOutput {
                        matches: *matches,
                        expected: *expected,
                        stored: *stored,
                    },
                    "import",
                ),
                OutputFormat::Quiet => String::new(),
            },
        }
    }

    /// `data` as a JSON envelope; nothing in table or quiet mode.
    pub fn format_success<T: Serialize>(&self, data: &T, command: &str) -> String {
        match self.format {
            OutputFormat::Json => self.to_json_response(data, command),
            OutputFormat::Table | OutputFormat::Quiet => String::new(),
        }
    }

    /// Only shown in verbose table mode.
    pub fn progress(&self, message: &str) {
        if self.verbose && self.format == OutputFormat::Table {
            eprintln!("... {message}");
        }
    }

    pub fn success(&self, message: &str) {
        if self.format == OutputFormat::Table {
            println!("✓ {message}");
        }
    }

    pub fn error(&self, message: &str, kind: Option<&str>) {
        match self.format {
            OutputFormat::Table => eprintln!("✗ {message}"),
            OutputFormat::Json => println!("{}", to_json(&JsonResponse::error(message, kind))),
            OutputFormat::Quiet => {}
        }
    }

    pub fn warning(&self, message: &str) {
        match self.format {
            OutputFormat::Table => eprintln!("⚠ {message}"),
            OutputFormat::Json => println!(
                "{}",
                to_json(&WarningOutput {
                    warning: message,
                    timestamp: Utc::now().to_rfc3339(),
                })
            ),
            OutputFormat::Quiet => {}
        }
    }

    fn to_json_response<T: Serialize>(&self, value: &T, command: &str) -> String {
        to_json(&JsonResponse::success_with_command(value, command))
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
}

fn property_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Property", "Value"]);
    table
}

fn format_time(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

#[derive(Serialize)]
struct PeersOutput<'a> {
    network: &'a str,
    peers: &'a [PeerSummary],
}

#[derive(Serialize)]
struct PendingOutput {
    peer: String,
    reason: &'static str,
    existing_fingerprint: Option<Fingerprint>,
    new_fingerprint: Fingerprint,
    timestamp: String,
}

impl From<&PendingKeyRequest> for PendingOutput {
    fn from(r: &PendingKeyRequest) -> Self {
        Self {
            peer: r.peer.to_string(),
            reason: r.reason.as_str(),
            existing_fingerprint: r.existing_fingerprint,
            new_fingerprint: r.new_fingerprint,
            timestamp: r.timestamp.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
struct ComparisonOutput {
    matches: bool,
    expected: Fingerprint,
    stored: Option<Fingerprint>,
}

#[derive(Serialize)]
struct WarningOutput<'a> {
    warning: &'a str,
    timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ircdm_core::{PeerId, PendingReason};
    use ircdm_crypto::{sign_bundle, Identity};

    fn summary() -> PeerSummary {
        PeerSummary {
            nick: "bob".to_string(),
            fingerprint: sign_bundle(&Identity::generate().unwrap()).fingerprint(),
            verified: true,
            first_seen: Some(Utc::now()),
            last_seen: None,
        }
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("table".parse::<OutputFormat>().unwrap(), OutputFormat::Table);
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("quiet".parse::<OutputFormat>().unwrap(), OutputFormat::Quiet);
        assert!("xml".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::Json.to_string(), "json");
    }

    #[test]
    fn test_peers_json_envelope() {
        let formatter = OutputFormatter::new(OutputFormat::Json, false);
        let peer = summary();
        let out = formatter.format_peers("Libera", std::slice::from_ref(&peer));

        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["command"], "peers list");
        assert_eq!(value["data"]["network"], "Libera");
        assert_eq!(value["data"]["peers"][0]["nick"], "bob");
        assert_eq!(
            value["data"]["peers"][0]["fingerprint"],
            peer.fingerprint.to_hex()
        );
    }

    #[test]
    fn test_peers_table_and_quiet() {
        let table = OutputFormatter::new(OutputFormat::Table, false);
        assert!(table.format_peers("Libera", &[]).contains("No peer keys"));
        assert!(table.format_peers("Libera", &[summary()]).contains("bob"));

        let quiet = OutputFormatter::new(OutputFormat::Quiet, false);
        assert!(quiet.format_peers("Libera", &[summary()]).is_empty());
    }

    #[test]
    fn test_pending_json() {
        let bundle = sign_bundle(&Identity::generate().unwrap());
        let request = PendingKeyRequest {
            peer: PeerId::new("Libera", "bob"),
            new_fingerprint: bundle.fingerprint(),
            bundle,
            timestamp: Utc::now(),
            reason: PendingReason::Change,
            existing_fingerprint: None,
        };
        let out = OutputFormatter::new(OutputFormat::Json, false).format_pending(&request);
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["data"]["peer"], "bob@Libera");
        assert_eq!(value["data"]["reason"], "change");
        assert!(value["data"]["existing_fingerprint"].is_null());
    }

    #[test]
    fn test_error_envelope() {
        let response = JsonResponse::error("boom", Some("key_changed"));
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error_kind"], "key_changed");
        assert!(value.get("data").is_none());
    }
}
