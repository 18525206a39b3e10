use crate::{
    codecs::{LineCodec, LineDecoder, MultilineCodec, MultilineWhat},
    services::{archive::ArchivalPolicy, checkpoint::CheckpointStore, filter::ObjectFilter},
};
use anyhow::{Context, Result, bail};
use clap::Parser;
use regex::Regex;
use std::{env, path::PathBuf, str::FromStr, time::Duration};

const ENV_PREFIX: &str = "OBJECT_INGEST_";
const DEFAULT_GZIP_PATTERN: &str = r"\.gz(ip)?$";

/// Which decoder turns lines into records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    Line,
    Multiline,
}

impl FromStr for CodecKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "line" | "plain" => Ok(Self::Line),
            "multiline" => Ok(Self::Multiline),
            other => Err(format!("unknown codec `{}`", other)),
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bucket: String,
    pub prefix: String,
    pub store_root: PathBuf,
    pub checkpoint_path: PathBuf,
    pub backup_bucket: Option<String>,
    pub backup_prefix: String,
    pub backup_dir: Option<PathBuf>,
    pub delete: bool,
    pub interval: Duration,
    pub exclude_pattern: Option<Regex>,
    pub temporary_directory: PathBuf,
    pub gzip_pattern: Regex,
    pub watch_for_new_files: bool,
    pub include_object_properties: bool,
    pub codec: CodecKind,
    pub multiline_pattern: Option<Regex>,
    pub multiline_negate: bool,
    pub multiline_what: MultilineWhat,
    pub multiline_max_lines: usize,
    pub add_fields: Vec<(String, String)>,
}

/// Command-line + environment configuration.
///
/// Every option falls back to `OBJECT_INGEST_<NAME>` when absent.
#[derive(Parser, Debug)]
#[command(author, version, about = "Incrementally ingest new objects from a bucket")]
pub struct Args {
    /// Source bucket (required)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Only keys starting with this prefix are considered
    #[arg(long)]
    pub prefix: Option<String>,

    /// Directory whose subdirectories are buckets
    #[arg(long)]
    pub store_root: Option<PathBuf>,

    /// Checkpoint file (default: ~/.sincedb_<md5(bucket+prefix)>)
    #[arg(long)]
    pub checkpoint_path: Option<PathBuf>,

    /// Copy (or move, with --delete) processed objects into this bucket
    #[arg(long)]
    pub backup_bucket: Option<String>,

    /// Prepended to the key of backed-up objects
    #[arg(long)]
    pub backup_prefix: Option<String>,

    /// Copy processed objects into this local directory
    #[arg(long)]
    pub backup_dir: Option<PathBuf>,

    /// Remove processed objects from the source bucket
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub delete: Option<bool>,

    /// Seconds to wait between cycles
    #[arg(long)]
    pub interval: Option<u64>,

    /// Keys matching this regex are never ingested
    #[arg(long)]
    pub exclude_pattern: Option<String>,

    /// Where objects are staged while being read
    #[arg(long)]
    pub temporary_directory: Option<PathBuf>,

    /// Keys matching this regex are gunzipped
    #[arg(long)]
    pub gzip_pattern: Option<String>,

    /// Keep polling; `false` runs a single cycle
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub watch_for_new_files: Option<bool>,

    /// Attach object size and etag to records
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub include_object_properties: Option<bool>,

    /// `line` or `multiline`
    #[arg(long)]
    pub codec: Option<CodecKind>,

    /// Continuation pattern for the multiline codec
    #[arg(long)]
    pub multiline_pattern: Option<String>,

    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub multiline_negate: Option<bool>,

    /// `previous` or `next`
    #[arg(long)]
    pub multiline_what: Option<MultilineWhat>,

    #[arg(long)]
    pub multiline_max_lines: Option<usize>,

    /// `key=value` added to every record; repeatable
    #[arg(long)]
    pub add_field: Vec<String>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        let args = Args::parse();
        Self::resolve(args, |name| env::var(name).ok())
    }

    /// Merge `args` over variables read through `lookup`, over defaults.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        let bucket = match args.bucket.or_else(|| var("BUCKET")) {
            Some(bucket) if !bucket.is_empty() => bucket,
            _ => bail!("a source bucket is required (--bucket or {}BUCKET)", ENV_PREFIX),
        };
        let prefix = args.prefix.or_else(|| var("PREFIX")).unwrap_or_default();

        let checkpoint_path = match args
            .checkpoint_path
            .or_else(|| var("CHECKPOINT_PATH").map(PathBuf::from))
        {
            Some(path) => path,
            None => {
                let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
                CheckpointStore::default_path(&home, &bucket, &prefix)
            }
        };

        let interval_secs = match args.interval {
            Some(secs) => secs,
            None => parse_var(&var, "INTERVAL")?.unwrap_or(60),
        };

        let exclude_pattern = args
            .exclude_pattern
            .or_else(|| var("EXCLUDE_PATTERN"))
            .filter(|pattern| !pattern.is_empty())
            .map(|pattern| compile("exclude pattern", &pattern))
            .transpose()?;

        let gzip_pattern = compile(
            "gzip pattern",
            &args
                .gzip_pattern
                .or_else(|| var("GZIP_PATTERN"))
                .unwrap_or_else(|| DEFAULT_GZIP_PATTERN.into()),
        )?;

        let codec = match args.codec {
            Some(codec) => codec,
            None => parse_var(&var, "CODEC")?.unwrap_or(CodecKind::Line),
        };
        let multiline_pattern = args
            .multiline_pattern
            .or_else(|| var("MULTILINE_PATTERN"))
            .map(|pattern| compile("multiline pattern", &pattern))
            .transpose()?;
        if codec == CodecKind::Multiline && multiline_pattern.is_none() {
            bail!("the multiline codec needs --multiline-pattern");
        }

        let mut raw_fields = args.add_field;
        if raw_fields.is_empty() {
            if let Some(value) = var("ADD_FIELD") {
                raw_fields = value.split(',').map(str::to_string).collect();
            }
        }
        let add_fields = raw_fields
            .iter()
            .filter(|field| !field.trim().is_empty())
            .map(|field| parse_field(field))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            bucket,
            prefix,
            store_root: args
                .store_root
                .or_else(|| var("STORE_ROOT").map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from("./data/objects")),
            checkpoint_path,
            backup_bucket: args
                .backup_bucket
                .or_else(|| var("BACKUP_BUCKET"))
                .filter(|name| !name.is_empty()),
            backup_prefix: args
                .backup_prefix
                .or_else(|| var("BACKUP_PREFIX"))
                .unwrap_or_default(),
            backup_dir: args
                .backup_dir
                .or_else(|| var("BACKUP_DIR").map(PathBuf::from)),
            delete: flag(args.delete, &var, "DELETE", false)?,
            interval: Duration::from_secs(interval_secs),
            exclude_pattern,
            temporary_directory: args
                .temporary_directory
                .or_else(|| var("TEMPORARY_DIRECTORY").map(PathBuf::from))
                .unwrap_or_else(|| env::temp_dir().join("object-ingest")),
            gzip_pattern,
            watch_for_new_files: flag(
                args.watch_for_new_files,
                &var,
                "WATCH_FOR_NEW_FILES",
                true,
            )?,
            include_object_properties: flag(
                args.include_object_properties,
                &var,
                "INCLUDE_OBJECT_PROPERTIES",
                false,
            )?,
            codec,
            multiline_pattern,
            multiline_negate: flag(args.multiline_negate, &var, "MULTILINE_NEGATE", false)?,
            multiline_what: match args.multiline_what {
                Some(what) => what,
                None => {
                    parse_var(&var, "MULTILINE_WHAT")?.unwrap_or(MultilineWhat::Previous)
                }
            },
            multiline_max_lines: match args.multiline_max_lines {
                Some(lines) => lines,
                None => parse_var(&var, "MULTILINE_MAX_LINES")?
                    .unwrap_or(crate::codecs::multiline::DEFAULT_MAX_LINES),
            },
            add_fields,
        })
    }

    pub fn object_filter(&self) -> ObjectFilter {
        ObjectFilter::new(
            &self.bucket,
            &self.prefix,
            self.backup_bucket.as_deref(),
            Some(self.backup_prefix.as_str()),
            self.exclude_pattern.clone(),
        )
    }

    pub fn archival_policy(&self) -> ArchivalPolicy {
        ArchivalPolicy {
            backup_bucket: self.backup_bucket.clone(),
            backup_prefix: self.backup_prefix.clone(),
            backup_dir: self.backup_dir.clone(),
            delete: self.delete,
        }
    }

    pub fn decoder(&self) -> Box<dyn LineDecoder> {
        match (self.codec, &self.multiline_pattern) {
            (CodecKind::Multiline, Some(pattern)) => Box::new(
                MultilineCodec::new(pattern.clone(), self.multiline_negate, self.multiline_what)
                    .with_max_lines(self.multiline_max_lines),
            ),
            _ => Box::new(LineCodec),
        }
    }
}

/// Read `<prefix><name>` and parse it, naming the variable on failure.
fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|err| anyhow::anyhow!("{}", err))
            .with_context(|| format!("parsing {}{} value `{}`", ENV_PREFIX, name, value)),
        None => Ok(None),
    }
}

fn flag(
    arg: Option<bool>,
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: bool,
) -> Result<bool> {
    match arg {
        Some(value) => Ok(value),
        None => Ok(parse_var(var, name)?.unwrap_or(default)),
    }
}

fn compile(what: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).with_context(|| format!("invalid {} `{}`", what, pattern))
}

fn parse_field(field: &str) -> Result<(String, String)> {
    match field.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => bail!("add_field `{}` is not of the form key=value", field),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolve(argv: &[&str], vars: &[(&str, &str)]) -> Result<AppConfig> {
        let mut full = vec!["object-ingest"];
        full.extend_from_slice(argv);
        let args = Args::try_parse_from(full)?;
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::resolve(args, |name| vars.get(name).cloned())
    }

    #[test]
    fn bucket_is_required() {
        let err = resolve(&[], &[]).unwrap_err();
        assert!(err.to_string().contains("bucket"));
    }

    #[test]
    fn defaults_apply() {
        let cfg = resolve(&["--bucket", "logs"], &[]).unwrap();
        assert_eq!(cfg.prefix, "");
        assert_eq!(cfg.interval, Duration::from_secs(60));
        assert!(!cfg.delete);
        assert!(cfg.watch_for_new_files);
        assert_eq!(cfg.codec, CodecKind::Line);
        assert!(cfg.gzip_pattern.is_match("a.log.gz"));
        assert!(cfg.gzip_pattern.is_match("a.log.gzip"));
        assert!(!cfg.gzip_pattern.is_match("a.log"));
        assert!(cfg.temporary_directory.ends_with("object-ingest"));
        let name = cfg.checkpoint_path.file_name().unwrap().to_str().unwrap();
        assert_eq!(name, format!(".sincedb_{:x}", md5::compute("logs+")));
    }

    #[test]
    fn args_override_env() {
        let cfg = resolve(
            &["--bucket", "cli", "--interval", "5", "--delete"],
            &[
                ("OBJECT_INGEST_BUCKET", "env"),
                ("OBJECT_INGEST_INTERVAL", "30"),
                ("OBJECT_INGEST_PREFIX", "app/"),
                ("OBJECT_INGEST_DELETE", "false"),
            ],
        )
        .unwrap();
        assert_eq!(cfg.bucket, "cli");
        assert_eq!(cfg.interval, Duration::from_secs(5));
        assert_eq!(cfg.prefix, "app/");
        assert!(cfg.delete);
    }

    #[test]
    fn env_values_are_parsed() {
        let cfg = resolve(
            &[],
            &[
                ("OBJECT_INGEST_BUCKET", "logs"),
                ("OBJECT_INGEST_WATCH_FOR_NEW_FILES", "false"),
                ("OBJECT_INGEST_ADD_FIELD", "env=prod,team=core"),
                ("OBJECT_INGEST_CODEC", "multiline"),
                ("OBJECT_INGEST_MULTILINE_PATTERN", r"^\s"),
                ("OBJECT_INGEST_MULTILINE_WHAT", "next"),
            ],
        )
        .unwrap();
        assert!(!cfg.watch_for_new_files);
        assert_eq!(
            cfg.add_fields,
            vec![
                ("env".to_string(), "prod".to_string()),
                ("team".to_string(), "core".to_string())
            ]
        );
        assert_eq!(cfg.codec, CodecKind::Multiline);
        assert_eq!(cfg.multiline_what, MultilineWhat::Next);
    }

    #[test]
    fn bad_values_are_fatal() {
        let err =
            resolve(&["--bucket", "logs"], &[("OBJECT_INGEST_INTERVAL", "soon")]).unwrap_err();
        assert!(format!("{:#}", err).contains("OBJECT_INGEST_INTERVAL"));

        assert!(resolve(&["--bucket", "logs", "--exclude-pattern", "("], &[]).is_err());
        assert!(resolve(&["--bucket", "logs", "--codec", "multiline"], &[]).is_err());
        assert!(resolve(&["--bucket", "logs", "--add-field", "novalue"], &[]).is_err());
    }

    #[test]
    fn derived_components_follow_config() {
        let cfg = resolve(
            &[
                "--bucket",
                "logs",
                "--backup-bucket",
                "logs",
                "--backup-prefix",
                "done/",
                "--delete",
                "--exclude-pattern",
                r"\.tmp$",
            ],
            &[],
        )
        .unwrap();

        let filter = cfg.object_filter();
        assert!(filter.should_ignore("done/a.log"));
        assert!(filter.should_ignore("a.tmp"));
        assert!(!filter.should_ignore("a.log"));

        let policy = cfg.archival_policy();
        assert_eq!(policy.backup_key("a.log"), "done/a.log");
        assert!(policy.delete);
    }
}
