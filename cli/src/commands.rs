//! Command definitions and their execution against a [`DbService`].
//!
//! Every command produces a JSON value which `main` prints to stdout.

use crate::error::{CliError, Result};
use clap::{Parser, Subcommand, ValueEnum};
use keyshelf_engine::{
    field_value, loose_equals, DbService, JoinOptions, Key, MergePolicy, Record, SchemaVersion,
    SelectOptions, StoreSpec, UpdateTarget,
};
use serde_json::{json, Value};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "keyshelf")]
#[command(about = "Inspect and edit keyshelf databases", long_about = None)]
pub struct Cli {
    /// Directory holding database files (overrides KEYSHELF_DATA_DIR)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Database to operate on (overrides KEYSHELF_DATABASE)
    #[arg(short, long, global = true)]
    pub database: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the database, or upgrade it by adding stores
    Create {
        /// Path to a JSON array of store specs
        #[arg(short, long)]
        schema: PathBuf,

        /// Schema version to open at
        #[arg(long, default_value_t = 1)]
        version: SchemaVersion,
    },

    /// Delete the database and all of its stores
    Drop,

    /// Check whether a database exists
    Exists {
        /// Database name (defaults to the configured database)
        name: Option<String>,
    },

    /// List the stores of the database
    Stores,

    /// Write one record or an array of records
    Put {
        store: String,

        /// Inline JSON record or array
        #[arg(long, conflicts_with = "file")]
        data: Option<String>,

        /// File containing a JSON record or array
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Read records from a store
    Select {
        store: String,

        /// Iterate through this index instead of the primary key
        #[arg(long)]
        index: Option<String>,

        /// Keep records whose field loosely equals the value
        #[arg(long = "where", value_name = "FIELD=VALUE")]
        conditions: Vec<String>,

        /// Sort by this field
        #[arg(long)]
        order_by: Option<String>,

        /// Sort descending
        #[arg(long)]
        desc: bool,

        /// Return only the first record
        #[arg(long)]
        first: bool,
    },

    /// Shallow-merge a patch onto matching records
    Update {
        store: String,

        /// Primary-key values to update
        #[arg(long, required_unless_present = "conditions")]
        key: Vec<String>,

        /// Update records whose field loosely equals the value
        #[arg(long = "where", value_name = "FIELD=VALUE")]
        conditions: Vec<String>,

        /// JSON object merged onto each record
        #[arg(long)]
        patch: String,
    },

    /// Delete records by key
    Delete {
        store: String,

        /// Keys to delete; JSON literals, bare words are strings
        #[arg(required = true)]
        keys: Vec<String>,

        /// Match keys against this index instead of the primary key
        #[arg(long)]
        index: Option<String>,
    },

    /// Remove every record from a store
    Truncate { store: String },

    /// Join two stores on a field
    Join {
        #[arg(long)]
        left: String,

        #[arg(long)]
        left_field: String,

        #[arg(long)]
        right: String,

        /// Defaults to the left field name
        #[arg(long)]
        right_field: Option<String>,

        #[arg(long, value_enum, default_value_t = JoinKind::Left)]
        kind: JoinKind,

        /// Keep left records as they are instead of merging
        #[arg(long)]
        left_only: bool,

        #[arg(long)]
        order_by: Option<String>,

        #[arg(long)]
        desc: bool,

        #[arg(long)]
        first: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum JoinKind {
    Inner,
    Left,
}

/// Run one command and return its printable result.
pub async fn execute(svc: &DbService, command: Command) -> Result<Value> {
    match command {
        Command::Create { schema, version } => {
            let raw = tokio::fs::read_to_string(&schema).await?;
            let specs: Vec<StoreSpec> = serde_json::from_str(&raw)?;
            svc.create_database(version, &specs).await?;
            tracing::info!(database = %svc.database(), version, "database ready");
            Ok(json!({
                "database": svc.database(),
                "version": version,
                "stores": svc.fetch_all_stores().await?,
            }))
        }

        Command::Drop => {
            svc.delete_database().await?;
            Ok(json!({ "dropped": svc.database() }))
        }

        Command::Exists { name } => {
            let name = name.unwrap_or_else(|| svc.database().to_string());
            Ok(Value::Bool(svc.database_exists(&name).await))
        }

        Command::Stores => Ok(json!(svc.fetch_all_stores().await?)),

        Command::Put { store, data, file } => {
            let raw = match (data, file) {
                (Some(data), _) => data,
                (None, Some(path)) => tokio::fs::read_to_string(&path).await?,
                (None, None) => {
                    return Err(CliError::BadArgument(
                        "put needs --data or --file".to_string(),
                    ))
                }
            };
            let stored = svc.store(&store, serde_json::from_str(&raw)?).await?;
            Ok(json!({ "stored": stored }))
        }

        Command::Select {
            store,
            index,
            conditions,
            order_by,
            desc,
            first,
        } => {
            let mut options = SelectOptions::new();
            if let Some(index) = index {
                options = options.index(index);
            }
            if let Some(filter) = conditions_filter(&conditions)? {
                options = options.filter(filter);
            }
            if let Some(field) = order_by {
                options = options.order_by(field);
            }
            if desc {
                options = options.descending();
            }
            if first {
                options = options.first_only();
            }
            Ok(svc.select(&store, &options).await?.into_value())
        }

        Command::Update {
            store,
            key,
            conditions,
            patch,
        } => {
            let patch = match serde_json::from_str::<Value>(&patch)? {
                Value::Object(map) => map,
                other => {
                    return Err(CliError::BadArgument(format!(
                        "patch must be a JSON object, got {}",
                        other
                    )))
                }
            };
            let target = if key.is_empty() {
                match conditions_filter(&conditions)? {
                    Some(filter) => UpdateTarget::filter(filter),
                    None => {
                        return Err(CliError::BadArgument(
                            "update needs --key or --where".to_string(),
                        ))
                    }
                }
            } else {
                UpdateTarget::keys(key.iter().map(|raw| parse_value(raw)))
            };
            let updated = svc.update(&store, target, &patch).await?;
            Ok(json!({ "updated": updated }))
        }

        Command::Delete { store, keys, index } => {
            let keys = keys
                .iter()
                .map(|raw| parse_key(raw))
                .collect::<Result<Vec<_>>>()?;
            let deleted = svc.delete(&store, &keys, index.as_deref()).await?;
            Ok(json!({ "deleted": deleted }))
        }

        Command::Truncate { store } => {
            svc.truncate(&store).await?;
            Ok(json!({ "truncated": store }))
        }

        Command::Join {
            left,
            left_field,
            right,
            right_field,
            kind,
            left_only,
            order_by,
            desc,
            first,
        } => {
            let right_field = right_field.unwrap_or_else(|| left_field.clone());
            let mut options = JoinOptions::new(left, left_field, right, right_field);
            if left_only {
                options = options.merge(MergePolicy::LeftOnly);
            }
            if let Some(field) = order_by {
                options = options.order_by(field);
            }
            if desc {
                options = options.descending();
            }
            if first {
                options = options.first_only();
            }
            let selection = match kind {
                JoinKind::Inner => svc.select_inner_join(&options).await?,
                JoinKind::Left => svc.select_left_join(&options).await?,
            };
            Ok(selection.into_value())
        }
    }
}

/// A JSON literal, or the raw text as a string when it does not parse.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn parse_key(raw: &str) -> Result<Key> {
    Key::from_value(&parse_value(raw))
        .ok_or_else(|| CliError::BadArgument(format!("not a valid key: {}", raw)))
}

fn parse_condition(raw: &str) -> Result<(String, Value)> {
    match raw.split_once('=') {
        Some((field, value)) if !field.trim().is_empty() => {
            Ok((field.trim().to_string(), parse_value(value)))
        }
        _ => Err(CliError::BadArgument(format!(
            "expected FIELD=VALUE, got {:?}",
            raw
        ))),
    }
}

/// Conjunction of `FIELD=VALUE` conditions, or `None` when there are none.
fn conditions_filter(
    raw: &[String],
) -> Result<Option<impl Fn(&Record) -> bool + Send + Sync + 'static>> {
    if raw.is_empty() {
        return Ok(None);
    }
    let conditions = raw
        .iter()
        .map(|c| parse_condition(c))
        .collect::<Result<Vec<_>>>()?;

    Ok(Some(move |record: &Record| {
        conditions
            .iter()
            .all(|(field, value)| loose_equals(field_value(record, field), Some(value)))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyshelf_engine::IndexSpec;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("keyshelf").chain(args.iter().copied())).unwrap()
    }

    async fn seeded() -> DbService {
        let svc = DbService::in_memory("cli");
        svc.create_database(
            1,
            &[
                StoreSpec::new(
                    "Customer",
                    vec![
                        IndexSpec::unique("CustomerID"),
                        IndexSpec::non_unique("CustomerName"),
                    ],
                ),
                StoreSpec::new(
                    "Policy",
                    vec![
                        IndexSpec::unique("PolicyID"),
                        IndexSpec::non_unique("CustomerID"),
                    ],
                ),
            ],
        )
        .await
        .unwrap();
        svc.store(
            "Customer",
            json!([
                {"CustomerID": 1, "CustomerName": "Ann"},
                {"CustomerID": 2, "CustomerName": "Bob"},
            ]),
        )
        .await
        .unwrap();
        svc.store("Policy", json!({"PolicyID": 10, "CustomerID": 1}))
            .await
            .unwrap();
        svc
    }

    #[test]
    fn parses_values_and_keys() {
        assert_eq!(parse_value("124"), json!(124));
        assert_eq!(parse_value("\"124\""), json!("124"));
        assert_eq!(parse_value("Ann"), json!("Ann"));
        assert_eq!(parse_key("[1,2]").unwrap(), Key::try_from(json!([1, 2])).unwrap());
        assert!(parse_key("true").is_err());
    }

    #[test]
    fn parses_conditions() {
        assert_eq!(
            parse_condition("Address.City=Paris").unwrap(),
            ("Address.City".to_string(), json!("Paris"))
        );
        assert_eq!(parse_condition("a==b").unwrap(), ("a".to_string(), json!("=b")));
        assert!(parse_condition("=x").is_err());
        assert!(parse_condition("novalue").is_err());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let parsed = cli(&["select", "Customer", "--database", "crm", "--desc"]);
        assert_eq!(parsed.database.as_deref(), Some("crm"));
        assert!(matches!(parsed.command, Command::Select { desc: true, .. }));
    }

    #[test]
    fn update_requires_a_target() {
        let args = ["keyshelf", "update", "Customer", "--patch", "{}"];
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[tokio::test]
    async fn select_with_where_and_first() {
        let svc = seeded().await;
        let out = execute(
            &svc,
            cli(&["select", "Customer", "--where", "customername=bob"]).command,
        )
        .await
        .unwrap();
        assert_eq!(out, json!([]));

        let out = execute(
            &svc,
            cli(&["select", "Customer", "--where", "CustomerName=BOB", "--first"]).command,
        )
        .await
        .unwrap();
        assert_eq!(out, json!({"CustomerID": 2, "CustomerName": "Bob"}));
    }

    #[tokio::test]
    async fn put_update_delete_flow() {
        let svc = seeded().await;

        let out = execute(
            &svc,
            cli(&["put", "Customer", "--data", r#"[{"CustomerID": 3}, {"CustomerID": 4}]"#]).command,
        )
        .await
        .unwrap();
        assert_eq!(out, json!({"stored": 2}));

        let out = execute(
            &svc,
            cli(&["update", "Customer", "--key", "\"3\"", "--patch", r#"{"Tier": "gold"}"#])
                .command,
        )
        .await
        .unwrap();
        assert_eq!(out, json!({"updated": 1}));

        let out = execute(&svc, cli(&["delete", "Customer", "3", "4", "99"]).command)
            .await
            .unwrap();
        assert_eq!(out, json!({"deleted": 2}));
    }

    #[tokio::test]
    async fn update_rejects_non_object_patch() {
        let svc = seeded().await;
        let err = execute(
            &svc,
            cli(&["update", "Customer", "--key", "1", "--patch", "[1]"]).command,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CliError::BadArgument(_)));
    }

    #[tokio::test]
    async fn join_defaults_to_left() {
        let svc = seeded().await;
        let out = execute(
            &svc,
            cli(&[
                "join",
                "--left",
                "Customer",
                "--left-field",
                "CustomerID",
                "--right",
                "Policy",
            ])
            .command,
        )
        .await
        .unwrap();
        assert_eq!(
            out,
            json!([
                {"CustomerID": 1, "CustomerName": "Ann", "PolicyID": 10},
                {"CustomerID": 2, "CustomerName": "Bob"},
            ])
        );

        let out = execute(
            &svc,
            cli(&[
                "join", "--left", "Customer", "--left-field", "CustomerID", "--right", "Policy",
                "--kind", "inner", "--left-only",
            ])
            .command,
        )
        .await
        .unwrap();
        assert_eq!(out, json!([{"CustomerID": 1, "CustomerName": "Ann"}]));
    }

    #[tokio::test]
    async fn create_from_schema_file() {
        let dir = tempfile::tempdir().unwrap();
        let schema = dir.path().join("schema.json");
        std::fs::write(
            &schema,
            r#"[{"storeName": "Claim", "indexes": [{"name": "ClaimID", "isUnique": true}], "addModifiedDataCol": true}]"#,
        )
        .unwrap();

        let svc = DbService::in_memory("fresh");
        let out = execute(
            &svc,
            cli(&["create", "--schema", schema.to_str().unwrap()]).command,
        )
        .await
        .unwrap();
        assert_eq!(out, json!({"database": "fresh", "version": 1, "stores": ["Claim"]}));

        let out = execute(&svc, cli(&["exists"]).command).await.unwrap();
        assert_eq!(out, json!(true));
        let out = execute(&svc, cli(&["exists", "other"]).command).await.unwrap();
        assert_eq!(out, json!(false));
    }
}
