use std::collections::HashSet;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use anyhow::{Context, Result};
use cqdb_core::{OpenError, Reader, Writer, WriterOptions};
use indexmap::IndexMap;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::BuildConfig;
use crate::outcome::ExecutionOutcome;

#[derive(Debug)]
struct InputError {
    line: usize,
    reason: String,
}

impl InputError {
    fn new(line: usize, reason: impl Into<String>) -> Self {
        Self {
            line,
            reason: reason.into(),
        }
    }
}

/// Parses `key<TAB>id` lines. The writer does not detect duplicates, so they
/// are rejected here.
fn parse_pairs(text: &str) -> Result<Vec<(String, i32)>, InputError> {
    let mut keys: IndexMap<String, i32> = IndexMap::new();
    let mut ids = HashSet::new();
    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let raw = raw.trim_end_matches('\r');
        if raw.is_empty() {
            continue;
        }
        let (key, id) = raw
            .rsplit_once('\t')
            .ok_or_else(|| InputError::new(line, "expected `key<TAB>id`"))?;
        if key.is_empty() {
            return Err(InputError::new(line, "key is empty"));
        }
        let id: i32 = id
            .trim()
            .parse()
            .map_err(|_| InputError::new(line, format!("invalid id '{id}'")))?;
        if id < 0 {
            return Err(InputError::new(line, format!("id {id} is negative")));
        }
        if !ids.insert(id) {
            return Err(InputError::new(line, format!("id {id} is assigned twice")));
        }
        if keys.insert(key.to_string(), id).is_some() {
            return Err(InputError::new(line, format!("key '{key}' appears twice")));
        }
    }
    Ok(keys.into_iter().collect())
}

/// Distinct non-empty lines mapped to the line number they first appear on.
fn first_appearances(text: &str) -> IndexMap<&str, usize> {
    let mut keys = IndexMap::new();
    for (index, raw) in text.lines().enumerate() {
        let raw = raw.trim_end_matches('\r');
        if !raw.is_empty() {
            keys.entry(raw).or_insert(index + 1);
        }
    }
    keys
}

/// Assigns dense ids to distinct lines in order of first appearance.
fn intern_lines(text: &str) -> Result<Vec<(String, i32)>, InputError> {
    first_appearances(text)
        .into_iter()
        .enumerate()
        .map(|(index, (key, line))| {
            i32::try_from(index)
                .map(|id| (key.to_string(), id))
                .map_err(|_| InputError::new(line, "too many distinct keys"))
        })
        .collect()
}

pub fn build(input: &Path, output: &Path, config: BuildConfig) -> Result<ExecutionOutcome> {
    let text = fs::read_to_string(input)
        .with_context(|| format!("failed to read {}", input.display()))?;
    let parsed = if config.intern {
        intern_lines(&text)
    } else {
        parse_pairs(&text)
    };
    let entries = match parsed {
        Ok(entries) => entries,
        Err(err) => {
            return Ok(ExecutionOutcome::user_error(
                format!("{}:{}: {}", input.display(), err.line, err.reason),
                json!({
                    "input": input.display().to_string(),
                    "line": err.line,
                    "hint": "use `key<TAB>id` lines, or pass --intern to number plain lines",
                }),
            ));
        }
    };

    let options = WriterOptions {
        one_way: config.one_way,
        ..WriterOptions::default()
    };
    let file = File::create(output)
        .with_context(|| format!("failed to create {}", output.display()))?;
    let mut writer = Writer::create(BufWriter::new(file), options)
        .with_context(|| format!("failed to start chunk in {}", output.display()))?;
    for (key, id) in &entries {
        writer
            .put(key, *id)
            .with_context(|| format!("failed to add '{key}' ({id})"))?;
    }
    let records = writer.num_records();
    let file = writer
        .close()
        .with_context(|| format!("failed to seal {}", output.display()))?
        .into_inner()
        .map_err(|err| err.into_error())
        .with_context(|| format!("failed to flush {}", output.display()))?;
    file.sync_all()
        .with_context(|| format!("failed to sync {}", output.display()))?;
    let size = file.metadata()?.len();
    info!(records, size, path = %output.display(), "chunk written");

    Ok(ExecutionOutcome::success(
        format!("wrote {records} records to {}", output.display()),
        json!({
            "output": output.display().to_string(),
            "records": records,
            "size": size,
            "one_way": config.one_way,
        }),
    ))
}

fn load(path: &Path) -> Result<Vec<u8>> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    debug!(path = %path.display(), len = bytes.len(), "loaded chunk");
    Ok(bytes)
}

fn unreadable(path: &Path, err: &OpenError) -> ExecutionOutcome {
    ExecutionOutcome::user_error(
        format!("{} is not a readable chunk: {err}", path.display()),
        json!({
            "db": path.display().to_string(),
            "code": err.code(),
            "reason": err.to_string(),
        }),
    )
}

fn passthrough(message: String, status_ok: bool, details: Value) -> ExecutionOutcome {
    let mut details = details;
    if let Value::Object(map) = &mut details {
        map.insert("passthrough".into(), Value::Bool(true));
    }
    if status_ok {
        ExecutionOutcome::success(message, details)
    } else {
        ExecutionOutcome::user_error(message, details)
    }
}

pub fn lookup(db: &Path, keys: &[String]) -> Result<ExecutionOutcome> {
    let bytes = load(db)?;
    let reader = match Reader::open(&bytes) {
        Ok(reader) => reader,
        Err(err) => return Ok(unreadable(db, &err)),
    };

    let mut lines = Vec::with_capacity(keys.len());
    let mut results = serde_json::Map::new();
    let mut missing = 0usize;
    for key in keys {
        let id = reader.to_id(key);
        if id.is_none() {
            missing += 1;
        }
        lines.push(match id {
            Some(id) => format!("{key}\t{id}"),
            None => format!("{key}\t<missing>"),
        });
        results.insert(key.clone(), id.map_or(Value::Null, Value::from));
    }
    Ok(passthrough(
        lines.join("\n"),
        missing == 0,
        json!({ "ids": results, "missing": missing }),
    ))
}

pub fn reverse(db: &Path, ids: &[i32]) -> Result<ExecutionOutcome> {
    let bytes = load(db)?;
    let reader = match Reader::open(&bytes) {
        Ok(reader) => reader,
        Err(err) => return Ok(unreadable(db, &err)),
    };
    if reader.is_one_way() {
        return Ok(ExecutionOutcome::user_error(
            format!("{} has no reverse index", db.display()),
            json!({
                "db": db.display().to_string(),
                "hint": "rebuild without --one-way (and without CQDB_ONE_WAY=1)",
            }),
        ));
    }

    let mut lines = Vec::with_capacity(ids.len());
    let mut results = serde_json::Map::new();
    let mut missing = 0usize;
    for id in ids {
        let key = reader.to_key(*id).map(String::from_utf8_lossy);
        if key.is_none() {
            missing += 1;
        }
        lines.push(match &key {
            Some(key) => format!("{id}\t{key}"),
            None => format!("{id}\t<missing>"),
        });
        results.insert(
            id.to_string(),
            key.map_or(Value::Null, |key| Value::from(key.into_owned())),
        );
    }
    Ok(passthrough(
        lines.join("\n"),
        missing == 0,
        json!({ "keys": results, "missing": missing }),
    ))
}

pub fn stat(db: &Path) -> Result<ExecutionOutcome> {
    let bytes = load(db)?;
    let reader = match Reader::open(&bytes) {
        Ok(reader) => reader,
        Err(err) => return Ok(unreadable(db, &err)),
    };
    let sizes = reader.bucket_sizes();
    let buckets_used = sizes.iter().filter(|n| **n > 0).count();
    let slots: usize = sizes.iter().sum();
    let largest = sizes.iter().copied().max().unwrap_or(0);

    Ok(ExecutionOutcome::success(
        format!(
            "{} records in {} of 256 buckets ({} bytes)",
            reader.num_records(),
            buckets_used,
            reader.chunk_size()
        ),
        json!({
            "db": db.display().to_string(),
            "size": reader.chunk_size(),
            "flags": reader.flags(),
            "one_way": reader.is_one_way(),
            "records": reader.num_records(),
            "backlinks": reader.backlink_count(),
            "buckets_used": buckets_used,
            "slots": slots,
            "largest_bucket": largest,
        }),
    ))
}

pub fn dump(db: &Path) -> Result<ExecutionOutcome> {
    let bytes = load(db)?;
    let reader = match Reader::open(&bytes) {
        Ok(reader) => reader,
        Err(err) => return Ok(unreadable(db, &err)),
    };
    let mut records: Vec<(i32, &[u8])> = reader.records().map(|(key, id)| (id, key)).collect();
    records.sort_unstable();
    let lines: Vec<String> = records
        .iter()
        .map(|(id, key)| format!("{id}\t{}", String::from_utf8_lossy(key)))
        .collect();
    Ok(passthrough(
        lines.join("\n"),
        true,
        json!({ "records": records.len() }),
    ))
}
