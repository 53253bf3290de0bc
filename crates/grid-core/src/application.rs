// SPDX-License-Identifier: MIT

//! [`Application`] — a Task describing a single executable invocation
//! (spec §3.3).

use crate::error::UserError;
use crate::resource::{Architecture, MemoryQuantity, ResourceRequest};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// A typed value for the `extra` attribute bag (spec §9: the
/// "**kw pass-through" redesign flag). Unknown keyword options at
/// construction time are accepted and attached here rather than rejected,
/// so Backends and Application subclasses can read extra hints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtraValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<ExtraValue>),
}

impl From<&str> for ExtraValue {
    fn from(s: &str) -> Self {
        ExtraValue::String(s.to_string())
    }
}
impl From<String> for ExtraValue {
    fn from(s: String) -> Self {
        ExtraValue::String(s)
    }
}
impl From<bool> for ExtraValue {
    fn from(b: bool) -> Self {
        ExtraValue::Bool(b)
    }
}
impl From<i64> for ExtraValue {
    fn from(i: i64) -> Self {
        ExtraValue::Int(i)
    }
}

/// A single executable invocation: argv, I/O staging lists, resource
/// requests, environment, and output recovery template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    /// `arguments[0]` is the program name as seen by the spawned process.
    pub arguments: Vec<String>,
    /// source URL -> remote relative path.
    pub inputs: BTreeMap<String, String>,
    /// remote relative path -> destination URL.
    pub outputs: BTreeMap<String, String>,
    pub stdin: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub join: bool,
    pub output_dir: String,
    pub environment: BTreeMap<String, String>,
    pub resources: ResourceRequest,
    pub tags: BTreeSet<String>,
    /// Unknown keyword options, preserved but not interpreted by the core.
    #[serde(default)]
    pub extra: BTreeMap<String, ExtraValue>,
}

impl Application {
    pub fn builder(arguments: impl IntoIterator<Item = impl Into<String>>) -> ApplicationBuilder {
        ApplicationBuilder::new(arguments)
    }
}

/// Builder performing the construction-time validation described in spec
/// §3.3: non-empty, NUL-free argv; relative-path-only I/O destinations;
/// positive numeric resource requests.
pub struct ApplicationBuilder {
    arguments: Vec<String>,
    inputs: BTreeMap<String, String>,
    outputs: BTreeMap<String, String>,
    stdin: Option<String>,
    stdout: Option<String>,
    stderr: Option<String>,
    join: bool,
    output_dir: String,
    environment: BTreeMap<String, String>,
    resources: ResourceRequest,
    tags: BTreeSet<String>,
    extra: BTreeMap<String, ExtraValue>,
}

impl ApplicationBuilder {
    fn new(arguments: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            arguments: arguments.into_iter().map(Into::into).collect(),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            stdin: None,
            stdout: None,
            stderr: None,
            join: false,
            output_dir: ".".to_string(),
            environment: BTreeMap::new(),
            resources: ResourceRequest::default(),
            tags: BTreeSet::new(),
            extra: BTreeMap::new(),
        }
    }

    pub fn input(mut self, source_url: impl Into<String>, remote_path: impl Into<String>) -> Self {
        self.inputs.insert(source_url.into(), remote_path.into());
        self
    }

    pub fn output(mut self, remote_path: impl Into<String>, dest_url: impl Into<String>) -> Self {
        self.outputs.insert(remote_path.into(), dest_url.into());
        self
    }

    pub fn stdin(mut self, path: impl Into<String>) -> Self {
        self.stdin = Some(path.into());
        self
    }

    pub fn stdout(mut self, path: impl Into<String>) -> Self {
        self.stdout = Some(path.into());
        self
    }

    pub fn stderr(mut self, path: impl Into<String>) -> Self {
        self.stderr = Some(path.into());
        self
    }

    pub fn join(mut self, join: bool) -> Self {
        self.join = join;
        self
    }

    pub fn output_dir(mut self, template: impl Into<String>) -> Self {
        self.output_dir = template.into();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn requested_cores(mut self, cores: i64) -> Result<Self, UserError> {
        if cores <= 0 {
            return Err(UserError::NonPositiveResource { field: "requested_cores", value: cores });
        }
        self.resources.requested_cores = cores as u32;
        Ok(self)
    }

    pub fn requested_memory(mut self, bytes: i64) -> Result<Self, UserError> {
        if bytes <= 0 {
            return Err(UserError::NonPositiveResource { field: "requested_memory", value: bytes });
        }
        self.resources.requested_memory = Some(MemoryQuantity::from_bytes(bytes as u64));
        Ok(self)
    }

    pub fn requested_walltime(mut self, secs: i64) -> Result<Self, UserError> {
        if secs <= 0 {
            return Err(UserError::NonPositiveResource {
                field: "requested_walltime",
                value: secs,
            });
        }
        self.resources.requested_walltime = Some(Duration::from_secs(secs as u64));
        Ok(self)
    }

    pub fn requested_architecture(mut self, arch: Architecture) -> Self {
        self.resources.requested_architecture = Some(arch);
        self
    }

    /// Accept an unknown keyword option, logged at debug level per spec
    /// §3.3 ("unknown keyword options are accepted ... but logged at
    /// debug level").
    pub fn extra(mut self, key: impl Into<String>, value: impl Into<ExtraValue>) -> Self {
        let key = key.into();
        tracing::debug!(option = %key, "accepting unknown Application keyword option");
        self.extra.insert(key, value.into());
        self
    }

    /// Validate and construct the [`Application`].
    pub fn build(mut self) -> Result<Application, UserError> {
        if self.arguments.is_empty() {
            return Err(UserError::EmptyArguments);
        }
        for (i, arg) in self.arguments.iter().enumerate() {
            if arg.as_bytes().contains(&0) {
                return Err(UserError::ArgumentContainsNul(i));
            }
        }
        for (field, map) in [("inputs", &self.inputs), ("outputs", &self.outputs)] {
            let paths = if field == "inputs" {
                map.values()
            } else {
                map.keys()
            };
            for p in paths {
                reject_absolute(field, p)?;
            }
        }

        if let Some(p) = &self.stdin {
            let remote = std::path::Path::new(p)
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
                .unwrap_or_else(|| p.clone());
            self.inputs.entry(p.clone()).or_insert(remote);
        }
        if let Some(p) = &self.stdout {
            self.outputs.entry(p.clone()).or_default();
        }
        if let Some(p) = &self.stderr {
            if !self.join {
                self.outputs.entry(p.clone()).or_default();
            }
        }

        Ok(Application {
            arguments: self.arguments,
            inputs: self.inputs,
            outputs: self.outputs,
            stdin: self.stdin,
            stdout: self.stdout,
            stderr: self.stderr,
            join: self.join,
            output_dir: self.output_dir,
            environment: self.environment,
            resources: self.resources,
            tags: self.tags,
            extra: self.extra,
        })
    }
}

fn reject_absolute(field: &'static str, path: &str) -> Result<(), UserError> {
    if path.starts_with('/') || path.starts_with('\\') {
        return Err(UserError::AbsolutePath { field, path: path.to_string() });
    }
    Ok(())
}

/// Canonical `output_dir` template substitution (spec §3.3, resolving the
/// "multiple variant forms" open question): `PATH`, `NAME`, `DATE`,
/// `TIME`, `SESSION`. Unknown `{TOKEN}` placeholders are left verbatim.
pub fn substitute_output_dir(
    template: &str,
    session_path: &str,
    jobname: &str,
    date: &str,
    time: &str,
    session_name: &str,
) -> String {
    template
        .replace("{PATH}", session_path)
        .replace("{NAME}", jobname)
        .replace("{DATE}", date)
        .replace("{TIME}", time)
        .replace("{SESSION}", session_name)
}
