//! # Stackfile
//!
//! TOML stack declaration parsing.
//!
//! A stack document declares resources and exported outputs:
//!
//! ```toml
//! [stack]
//! name = "platform"
//!
//! [stack.tags]
//! team = "infra"
//!
//! [[resource]]
//! name = "vpc"
//! type = "aws:ec2/vpc"
//!
//! [resource.inputs]
//! cidr_block = "10.0.0.0/16"
//!
//! [[resource]]
//! name = "subnet"
//! type = "aws:ec2/subnet"
//!
//! [resource.inputs]
//! vpc_id = "${vpc.id}"
//! cidr_block = "10.0.1.0/24"
//!
//! [outputs]
//! vpc-id = "${vpc.id}"
//! ```
//!
//! Strings may embed `${resource.attribute}` references. A string that is
//! exactly one reference parses to a reference value; mixed text parses to
//! a concatenation resolved once the referenced outputs are known. A
//! `{ secret = "..." }` table marks a value secret, so plans redact it.
//! Stack-level tags merge into every resource's `tags` input, with
//! resource-level keys winning.

mod error;

pub use error::{Error, Result};

use provision::{ReplacePolicy, ResourceDecl, ResourceOptions, Stack, Value};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct RawDocument {
    stack: RawStackMeta,
    #[serde(default, rename = "resource")]
    resources: Vec<RawResource>,
    #[serde(default)]
    outputs: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Deserialize)]
struct RawStackMeta {
    name: String,
    #[serde(default)]
    tags: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RawResource {
    name: String,
    #[serde(rename = "type")]
    resource_type: String,
    #[serde(default)]
    inputs: BTreeMap<String, toml::Value>,
    #[serde(default)]
    options: RawOptions,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOptions {
    #[serde(default)]
    depends_on: Vec<String>,
    replace_policy: Option<String>,
    #[serde(default)]
    protect: bool,
}

/// Read and parse a stack document from disk.
pub fn load(path: &Path) -> Result<Stack> {
    let content = fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&content)
}

/// Parse a stack document.
pub fn parse(content: &str) -> Result<Stack> {
    let raw: RawDocument = toml::from_str(content)?;
    let stack_tags = raw.stack.tags;

    let mut stack = Stack::new(raw.stack.name);
    let mut seen = BTreeSet::new();

    for resource in raw.resources {
        if !seen.insert(resource.name.clone()) {
            return Err(Error::DuplicateResource {
                name: resource.name,
            });
        }

        let mut decl = ResourceDecl::new(&resource.name, &resource.resource_type);
        for (key, value) in resource.inputs {
            let context = format!("{}.{key}", resource.name);
            let converted = convert(value, &context)?;
            decl.inputs.insert(key, converted);
        }
        merge_tags(&mut decl.inputs, &stack_tags);

        decl.options = ResourceOptions {
            depends_on: resource.options.depends_on,
            replace_policy: match resource.options.replace_policy.as_deref() {
                None => ReplacePolicy::default(),
                Some("create-before-destroy") => ReplacePolicy::CreateBeforeDestroy,
                Some("destroy-before-create") => ReplacePolicy::DestroyBeforeCreate,
                Some(other) => {
                    return Err(Error::UnknownReplacePolicy {
                        resource: resource.name,
                        value: other.to_string(),
                    });
                }
            },
            protect: resource.options.protect,
        };

        stack.resources.push(decl);
    }

    for (key, value) in raw.outputs {
        let context = format!("outputs.{key}");
        let converted = convert(value, &context)?;
        stack.exports.insert(key, converted);
    }

    Ok(stack)
}

/// Merge stack-level tags under each resource's `tags` input.
///
/// Resource-level keys win. A resource whose `tags` input is not a table
/// is left alone.
fn merge_tags(inputs: &mut BTreeMap<String, Value>, stack_tags: &BTreeMap<String, String>) {
    if stack_tags.is_empty() {
        return;
    }
    let mut merged: BTreeMap<String, Value> = stack_tags
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    match inputs.get("tags") {
        Some(Value::Map(own)) => {
            for (k, v) in own {
                merged.insert(k.clone(), v.clone());
            }
        }
        Some(_) => return,
        None => {}
    }
    inputs.insert("tags".to_string(), Value::Map(merged));
}

fn convert(value: toml::Value, context: &str) -> Result<Value> {
    Ok(match value {
        toml::Value::String(text) => parse_text(&text, context)?,
        toml::Value::Integer(n) => Value::Number(n.into()),
        toml::Value::Float(f) => {
            let number =
                serde_json::Number::from_f64(f).ok_or_else(|| Error::UnsupportedValue {
                    context: context.to_string(),
                    reason: format!("non-finite float {f}"),
                })?;
            Value::Number(number)
        }
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => {
            let mut list = Vec::with_capacity(items.len());
            for item in items {
                list.push(convert(item, context)?);
            }
            Value::List(list)
        }
        toml::Value::Table(table) => {
            // `{ secret = "..." }` marks the wrapped value secret.
            if table.len() == 1
                && let Some(inner) = table.get("secret")
            {
                let inner = convert(inner.clone(), context)?;
                return Ok(Value::Secret(Box::new(inner)));
            }
            let mut map = BTreeMap::new();
            for (key, item) in table {
                let converted = convert(item, &format!("{context}.{key}"))?;
                map.insert(key, converted);
            }
            Value::Map(map)
        }
    })
}

/// Parse a string that may embed `${resource.attribute}` references.
pub fn parse_text(text: &str, context: &str) -> Result<Value> {
    let mut parts: Vec<Value> = Vec::new();
    let mut literal = String::new();
    let mut rest = text;

    while let Some(start) = rest.find("${") {
        literal.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            return Err(Error::MalformedReference {
                text: rest[start..].to_string(),
                context: context.to_string(),
                reason: "unterminated '${'".to_string(),
            });
        };
        let reference = parse_reference(&after[..end], context)?;
        if !literal.is_empty() {
            parts.push(Value::String(std::mem::take(&mut literal)));
        }
        parts.push(Value::Ref(reference));
        rest = &after[end + 1..];
    }
    literal.push_str(rest);

    if parts.is_empty() {
        return Ok(Value::String(literal));
    }
    if !literal.is_empty() {
        parts.push(Value::String(literal));
    }
    if parts.len() == 1 {
        Ok(parts.remove(0))
    } else {
        Ok(Value::Concat(parts))
    }
}

fn parse_reference(body: &str, context: &str) -> Result<provision::Reference> {
    let malformed = |reason: &str| Error::MalformedReference {
        text: format!("${{{body}}}"),
        context: context.to_string(),
        reason: reason.to_string(),
    };

    let (resource, attribute) = body
        .split_once('.')
        .ok_or_else(|| malformed("expected 'resource.attribute'"))?;

    if resource.is_empty() || attribute.is_empty() {
        return Err(malformed("expected 'resource.attribute'"));
    }
    let name_char = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-';
    if !resource.chars().all(name_char) {
        return Err(malformed("invalid resource name"));
    }
    if !attribute.chars().all(|c| name_char(c) || c == '.') {
        return Err(malformed("invalid attribute name"));
    }

    Ok(provision::Reference {
        resource: resource.to_string(),
        attribute: attribute.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use provision::Reference;

    #[test]
    fn parses_a_full_document() {
        let stack = parse(
            r#"
            [stack]
            name = "platform"

            [stack.tags]
            team = "infra"

            [[resource]]
            name = "vpc"
            type = "aws:ec2/vpc"

            [resource.inputs]
            cidr_block = "10.0.0.0/16"
            enable_dns_support = true

            [[resource]]
            name = "subnet"
            type = "aws:ec2/subnet"

            [resource.inputs]
            vpc_id = "${vpc.id}"
            cidr_block = "10.0.1.0/24"

            [resource.options]
            protect = true

            [outputs]
            vpc-id = "${vpc.id}"
            "#,
        )
        .unwrap();

        assert_eq!(stack.name, "platform");
        assert_eq!(stack.resources.len(), 2);

        let vpc = stack.resource("vpc").unwrap();
        assert_eq!(vpc.resource_type, "aws:ec2/vpc");
        assert_eq!(vpc.inputs["cidr_block"], Value::string("10.0.0.0/16"));
        assert_eq!(vpc.inputs["enable_dns_support"], Value::Bool(true));

        let subnet = stack.resource("subnet").unwrap();
        assert!(subnet.options.protect);
        assert_eq!(
            subnet.inputs["vpc_id"],
            Value::Ref(Reference {
                resource: "vpc".into(),
                attribute: "id".into(),
            })
        );

        assert!(stack.exports.contains_key("vpc-id"));
    }

    #[test]
    fn single_reference_vs_concatenation() {
        let single = parse_text("${db.endpoint}", "t").unwrap();
        assert!(matches!(single, Value::Ref(_)));

        let mixed = parse_text("postgres://admin@${db.address}:5432/app", "t").unwrap();
        let Value::Concat(parts) = mixed else {
            panic!("expected concat");
        };
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], Value::string("postgres://admin@"));
        assert_eq!(parts[2], Value::string(":5432/app"));

        let plain = parse_text("no references here", "t").unwrap();
        assert_eq!(plain, Value::string("no references here"));
    }

    #[test]
    fn secret_table_wraps_the_value() {
        let stack = parse(
            r#"
            [stack]
            name = "demo"

            [[resource]]
            name = "param"
            type = "aws:ssm/parameter"

            [resource.inputs]
            name = "/app/db-url"
            value = { secret = "postgres://admin:hunter2@${db.address}/app" }
            "#,
        )
        .unwrap();

        let param = stack.resource("param").unwrap();
        let Value::Secret(inner) = &param.inputs["value"] else {
            panic!("expected secret");
        };
        assert!(matches!(**inner, Value::Concat(_)));
        assert!(param.inputs["value"].contains_secret());
    }

    #[test]
    fn stack_tags_merge_with_resource_tags_winning() {
        let stack = parse(
            r#"
            [stack]
            name = "demo"

            [stack.tags]
            team = "infra"
            env = "dev"

            [[resource]]
            name = "bucket"
            type = "aws:s3/bucket"

            [resource.inputs]
            bucket = "demo-data"

            [resource.inputs.tags]
            env = "prod"

            [[resource]]
            name = "vpc"
            type = "aws:ec2/vpc"
            "#,
        )
        .unwrap();

        let Value::Map(tags) = &stack.resource("bucket").unwrap().inputs["tags"] else {
            panic!("expected tags map");
        };
        assert_eq!(tags["team"], Value::string("infra"));
        assert_eq!(tags["env"], Value::string("prod"));

        let Value::Map(tags) = &stack.resource("vpc").unwrap().inputs["tags"] else {
            panic!("expected tags map");
        };
        assert_eq!(tags["env"], Value::string("dev"));
    }

    #[test]
    fn duplicate_resource_is_rejected() {
        let err = parse(
            r#"
            [stack]
            name = "demo"

            [[resource]]
            name = "vpc"
            type = "aws:ec2/vpc"

            [[resource]]
            name = "vpc"
            type = "aws:ec2/vpc"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::DuplicateResource { name } if name == "vpc"));
    }

    #[test]
    fn malformed_references_are_rejected() {
        assert!(matches!(
            parse_text("${unterminated", "t"),
            Err(Error::MalformedReference { .. })
        ));
        assert!(matches!(
            parse_text("${noattribute}", "t"),
            Err(Error::MalformedReference { .. })
        ));
        assert!(matches!(
            parse_text("${bad name.id}", "t"),
            Err(Error::MalformedReference { .. })
        ));
    }

    #[test]
    fn unknown_option_and_policy_are_rejected() {
        let err = parse(
            r#"
            [stack]
            name = "demo"

            [[resource]]
            name = "vpc"
            type = "aws:ec2/vpc"

            [resource.options]
            retain = true
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Parse(_)));

        let err = parse(
            r#"
            [stack]
            name = "demo"

            [[resource]]
            name = "db"
            type = "aws:rds/instance"

            [resource.options]
            replace_policy = "recreate"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnknownReplacePolicy { .. }));
    }

    #[test]
    fn replace_policy_parses_both_variants() {
        let stack = parse(
            r#"
            [stack]
            name = "demo"

            [[resource]]
            name = "a"
            type = "test:thing"

            [resource.options]
            replace_policy = "destroy-before-create"

            [[resource]]
            name = "b"
            type = "test:thing"

            [resource.options]
            replace_policy = "create-before-destroy"

            [[resource]]
            name = "c"
            type = "test:thing"
            "#,
        )
        .unwrap();

        assert_eq!(
            stack.resource("a").unwrap().options.replace_policy,
            ReplacePolicy::DestroyBeforeCreate
        );
        assert_eq!(
            stack.resource("b").unwrap().options.replace_policy,
            ReplacePolicy::CreateBeforeDestroy
        );
        assert_eq!(
            stack.resource("c").unwrap().options.replace_policy,
            ReplacePolicy::CreateBeforeDestroy
        );
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.toml");
        fs::write(
            &path,
            "[stack]\nname = \"demo\"\n\n[[resource]]\nname = \"vpc\"\ntype = \"aws:ec2/vpc\"\n",
        )
        .unwrap();

        let stack = load(&path).unwrap();
        assert_eq!(stack.name, "demo");
        assert_eq!(stack.resources.len(), 1);

        let missing = load(&dir.path().join("absent.toml"));
        assert!(matches!(missing, Err(Error::Io { .. })));
    }
}
