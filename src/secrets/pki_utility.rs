//! Certificate and key tooling.
//!
//! Certificates come from `cfssl` and key pairs from `openssl`, each run as a
//! subprocess inside a scratch directory holding only its input files. The
//! [`CertificateTool`] trait keeps the generator independent of both.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::process::Command;

use chrono::{DateTime, Utc};
use log::debug;
use serde::Deserialize;
use serde_json::json;
use tempfile::TempDir;

use crate::error::{Error, Result};

pub const CFSSL: &str = "cfssl";
pub const OPENSSL: &str = "openssl";

/// Validity used when no duration is given.
pub const DEFAULT_DURATION_DAYS: i64 = 365;

const RSA_KEY_BITS: u32 = 2048;

/// PEM certificate and key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertAndKey {
    pub cert: String,
    pub key: String,
}

/// PEM public and private key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keypair {
    pub public_key: String,
    pub private_key: String,
}

/// A leaf certificate request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateRequest {
    pub common_name: String,
    pub hosts: Vec<String>,
    pub groups: Vec<String>,
}

/// The external certificate/key tooling.
pub trait CertificateTool {
    fn generate_ca(&self, common_name: &str) -> Result<CertAndKey>;

    fn generate_certificate(&self, ca: &CertAndKey, request: &CertificateRequest) -> Result<CertAndKey>;

    fn generate_keypair(&self) -> Result<Keypair>;

    /// Expiry time of a PEM certificate.
    fn not_after(&self, cert: &str) -> Result<DateTime<Utc>>;
}

#[derive(Deserialize)]
struct CfsslCertResponse {
    cert: String,
    key: String,
}

#[derive(Deserialize)]
struct CfsslCertInfo {
    not_after: String,
}

/// `cfssl` and `openssl` run as subprocesses.
#[derive(Debug, Clone)]
pub struct PkiUtility {
    duration_days: i64,
}

impl Default for PkiUtility {
    fn default() -> Self {
        Self {
            duration_days: DEFAULT_DURATION_DAYS,
        }
    }
}

impl PkiUtility {
    /// Signs certificates valid for `duration_days`, which must be positive.
    pub fn new(duration_days: i64) -> Result<Self> {
        if duration_days <= 0 {
            return Err(Error::InvalidDuration {
                days: duration_days,
            });
        }
        Ok(Self { duration_days })
    }

    /// Signing expiry in hours, as cfssl expects it.
    pub fn expiry_hours(&self) -> i64 {
        24 * self.duration_days
    }

    fn ca_config(&self) -> serde_json::Value {
        json!({
            "signing": {
                "default": {
                    "expiry": format!("{}h", self.expiry_hours()),
                    "usages": ["signing", "key encipherment", "server auth", "client auth"]
                }
            }
        })
    }

    fn csr(common_name: &str, hosts: &[String], groups: &[String]) -> serde_json::Value {
        let mut csr = json!({
            "CN": common_name,
            "key": {"algo": "rsa", "size": RSA_KEY_BITS},
        });
        if !hosts.is_empty() {
            csr["hosts"] = json!(hosts);
        }
        if !groups.is_empty() {
            csr["names"] = json!(groups.iter().map(|g| json!({"O": g})).collect::<Vec<_>>());
        }
        csr
    }
}

/// Output of a tool run: stdout and every file it created.
struct ToolOutput {
    stdout: String,
    files: BTreeMap<String, String>,
}

/// Runs `tool args` in a scratch directory seeded with `inputs`.
fn run_tool(tool: &str, args: &[&str], inputs: &[(&str, String)]) -> Result<ToolOutput> {
    let tool_error = |message: String| Error::CertTool {
        tool: tool.to_string(),
        message,
    };

    let binary = which::which(tool).map_err(|_| tool_error(format!("{} not found in PATH", tool)))?;
    let scratch = TempDir::new()?;
    for (name, contents) in inputs {
        fs::write(scratch.path().join(name), contents)?;
    }

    debug!("Running {} {}", tool, args.join(" "));
    let output = Command::new(binary)
        .args(args)
        .current_dir(scratch.path())
        .output()
        .map_err(|e| tool_error(e.to_string()))?;
    if !output.status.success() {
        return Err(tool_error(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    let known: BTreeSet<&str> = inputs.iter().map(|(name, _)| *name).collect();
    let mut files = BTreeMap::new();
    for entry in fs::read_dir(scratch.path())? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !known.contains(name.as_str()) && entry.file_type()?.is_file() {
            files.insert(name, fs::read_to_string(entry.path())?);
        }
    }

    Ok(ToolOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        files,
    })
}

fn parse_cert_response(stdout: &str) -> Result<CertAndKey> {
    let response: CfsslCertResponse = serde_json::from_str(stdout)?;
    Ok(CertAndKey {
        cert: response.cert,
        key: response.key,
    })
}

impl CertificateTool for PkiUtility {
    fn generate_ca(&self, common_name: &str) -> Result<CertAndKey> {
        let csr = Self::csr(common_name, &[], &[]);
        let output = run_tool(CFSSL, &["gencert", "-initca", "csr.json"], &[("csr.json", csr.to_string())])?;
        parse_cert_response(&output.stdout)
    }

    fn generate_certificate(&self, ca: &CertAndKey, request: &CertificateRequest) -> Result<CertAndKey> {
        let csr = Self::csr(&request.common_name, &request.hosts, &request.groups);
        let output = run_tool(
            CFSSL,
            &[
                "gencert",
                "-ca",
                "ca.pem",
                "-ca-key",
                "ca-key.pem",
                "-config",
                "ca-config.json",
                "csr.json",
            ],
            &[
                ("ca.pem", ca.cert.clone()),
                ("ca-key.pem", ca.key.clone()),
                ("ca-config.json", self.ca_config().to_string()),
                ("csr.json", csr.to_string()),
            ],
        )?;
        parse_cert_response(&output.stdout)
    }

    fn generate_keypair(&self) -> Result<Keypair> {
        let bits = RSA_KEY_BITS.to_string();
        let private = run_tool(OPENSSL, &["genrsa", "-out", "priv.pem", &bits], &[])?;
        let private_key = private.files.get("priv.pem").cloned().ok_or_else(|| Error::CertTool {
            tool: OPENSSL.to_string(),
            message: "genrsa produced no private key".to_string(),
        })?;

        let public = run_tool(
            OPENSSL,
            &["rsa", "-in", "priv.pem", "-pubout", "-out", "pub.pem"],
            &[("priv.pem", private_key.clone())],
        )?;
        let public_key = public.files.get("pub.pem").cloned().ok_or_else(|| Error::CertTool {
            tool: OPENSSL.to_string(),
            message: "rsa -pubout produced no public key".to_string(),
        })?;

        Ok(Keypair {
            public_key,
            private_key,
        })
    }

    fn not_after(&self, cert: &str) -> Result<DateTime<Utc>> {
        let output = run_tool(CFSSL, &["certinfo", "-cert", "cert.pem"], &[("cert.pem", cert.to_string())])?;
        let info: CfsslCertInfo = serde_json::from_str(&output.stdout)?;
        DateTime::parse_from_rfc3339(&info.not_after)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| Error::CertTool {
                tool: CFSSL.to_string(),
                message: format!("unparseable not_after {}: {}", info.not_after, e),
            })
    }
}
