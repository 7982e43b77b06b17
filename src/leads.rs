use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};
use tracing::warn;

const MAX_FIELD_CHARS: usize = 4000;
const CSV_COLUMNS: [&str; 8] = [
    "ts", "name", "email", "message", "business", "plan", "goal", "page",
];

#[derive(Debug, Error)]
pub enum LeadError {
    #[error("{0}")]
    Invalid(String),
    #[error("lead storage failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode lead: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Contact-form body as posted by the site.
#[derive(Debug, Default, Deserialize)]
pub struct LeadSubmission {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub business: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub goal: Option<String>,
    #[serde(default)]
    pub page: Option<String>,
    #[serde(default)]
    pub ts: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub ts: String,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LeadSubmission {
    pub fn into_lead(self) -> Result<Lead, LeadError> {
        let name = required(self.name, "name")?;
        let email = required(self.email, "email")?;
        if !email.contains('@') {
            return Err(LeadError::Invalid("email is invalid".to_string()));
        }
        let message = optional(self.message, "message")?;
        let business = optional(self.business, "business")?;
        let plan = optional(self.plan, "plan")?;
        let goal = optional(self.goal, "goal")?;
        let page = optional(self.page, "page")?;
        let ts = optional(self.ts, "ts")?
            .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));

        Ok(Lead {
            ts,
            name,
            email,
            message,
            business,
            plan,
            goal,
            page,
            extra: self.extra,
        })
    }
}

fn required(value: Option<String>, field: &str) -> Result<String, LeadError> {
    match optional(value, field)? {
        Some(value) => Ok(value),
        None => Err(LeadError::Invalid(format!("{field} is required"))),
    }
}

fn optional(value: Option<String>, field: &str) -> Result<Option<String>, LeadError> {
    let trimmed = value.as_deref().map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.chars().count() > MAX_FIELD_CHARS {
        return Err(LeadError::Invalid(format!("{field} is too long")));
    }
    Ok(Some(trimmed.to_string()))
}

impl Lead {
    fn csv_fields(&self) -> [&str; 8] {
        [
            self.ts.as_str(),
            self.name.as_str(),
            self.email.as_str(),
            or_blank(&self.message),
            or_blank(&self.business),
            or_blank(&self.plan),
            or_blank(&self.goal),
            or_blank(&self.page),
        ]
    }
}

fn or_blank(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

/// Append-only flat-file storage: `leads.jsonl` is authoritative, `leads.csv`
/// mirrors it for spreadsheet users.
#[derive(Debug)]
pub struct LeadStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl LeadStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn jsonl_path(&self) -> PathBuf {
        self.dir.join("leads.jsonl")
    }

    pub fn csv_path(&self) -> PathBuf {
        self.dir.join("leads.csv")
    }

    /// Stores `lead` once the JSONL line is written. The CSV mirror is
    /// best-effort and a failure there is only logged.
    pub async fn append(&self, lead: &Lead) -> Result<(), LeadError> {
        let mut line = serde_json::to_string(lead)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        fs::create_dir_all(&self.dir).await.map_err(io_at(&self.dir))?;

        let jsonl = self.jsonl_path();
        append_bytes(&jsonl, line.as_bytes()).await?;

        if let Err(err) = self.mirror_csv(lead).await {
            warn!("lead stored but csv mirror not updated: {err}");
        }
        Ok(())
    }

    async fn mirror_csv(&self, lead: &Lead) -> Result<(), LeadError> {
        let csv = self.csv_path();
        let mut rows = String::new();
        if !fs::try_exists(&csv).await.map_err(io_at(&csv))? {
            push_csv_row(&mut rows, CSV_COLUMNS);
        }
        push_csv_row(&mut rows, lead.csv_fields());
        append_bytes(&csv, rows.as_bytes()).await
    }

    /// Every stored lead in submission order. Lines that fail to parse are
    /// skipped.
    pub async fn list(&self) -> Result<Vec<Lead>, LeadError> {
        let path = self.jsonl_path();
        let contents = match fs::read_to_string(&path).await {
            Ok(v) => v,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_at(&path)(err)),
        };

        let mut leads = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Lead>(line) {
                Ok(lead) => leads.push(lead),
                Err(err) => warn!("skipping corrupt lead on line {}: {err}", index + 1),
            }
        }
        Ok(leads)
    }

    pub async fn count(&self) -> Result<usize, LeadError> {
        Ok(self.list().await?.len())
    }
}

async fn append_bytes(path: &Path, bytes: &[u8]) -> Result<(), LeadError> {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(io_at(path))?;
    file.write_all(bytes).await.map_err(io_at(path))?;
    file.flush().await.map_err(io_at(path))
}

fn io_at(path: &Path) -> impl FnOnce(std::io::Error) -> LeadError + '_ {
    move |source| LeadError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Renders leads as RFC 4180 CSV with a header row.
pub fn render_csv(leads: &[Lead]) -> String {
    let mut out = String::new();
    push_csv_row(&mut out, CSV_COLUMNS);
    for lead in leads {
        push_csv_row(&mut out, lead.csv_fields());
    }
    out
}

fn push_csv_row<'a>(out: &mut String, fields: impl IntoIterator<Item = &'a str>) {
    for (index, field) in fields.into_iter().enumerate() {
        if index > 0 {
            out.push(',');
        }
        if field.contains([',', '"', '\r', '\n']) {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(field);
        }
    }
    out.push_str("\r\n");
}
