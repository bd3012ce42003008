//! Subcommands. Every command returns the text printed on stdout.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use clap::{Args, Subcommand};
use heck::ToSnakeCase;
use switchyard_codec::proto::{self, ProtoManager};
use switchyard_codec::{Constructors, HeaderManager};
use switchyard_engine::Resolver;
use switchyard_store::Store;
use switchyard_types::path::{INPUT_RESOURCE, OUTPUT_RESOURCE, resource_path};
use switchyard_types::{FlowInterface, FlowsManifest, ParameterMap, PropertyReference};
use tracing::{debug, info};

use crate::config::{SwitchyardConfig, is_json};

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Resolve every flow and proxy and print their dependency graphs.
    Resolve(ResolveArgs),
    /// Encode the body of a target from a JSON document of input values.
    Encode(EncodeArgs),
    /// Decode a payload into a fresh store and print the stored values.
    Decode(DecodeArgs),
    /// Print the protobuf definition of a target body.
    Describe(DescribeArgs),
}

#[derive(Debug, Args)]
pub struct ResolveArgs {
    /// Flow manifest (YAML or JSON).
    #[arg(long, value_name = "FILE")]
    manifest: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct TargetArgs {
    /// Flow manifest (YAML or JSON).
    #[arg(long, value_name = "FILE")]
    manifest: Option<PathBuf>,

    /// Flow or proxy name.
    #[arg(long)]
    flow: String,

    /// `input`, `output` or a node id.
    #[arg(long)]
    target: String,
}

#[derive(Debug, Args)]
pub struct EncodeArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Codec name, defaults to the configured codec.
    #[arg(long)]
    codec: Option<String>,

    /// JSON document holding the flow input values.
    #[arg(long, value_name = "FILE")]
    values: PathBuf,
}

#[derive(Debug, Args)]
pub struct DecodeArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Codec name, defaults to the configured codec.
    #[arg(long)]
    codec: Option<String>,

    /// Payload to decode.
    #[arg(long, value_name = "FILE")]
    payload: PathBuf,

    /// Treat the payload file as base64 text.
    #[arg(long)]
    base64: bool,

    /// Incoming header, repeatable.
    #[arg(long = "header", value_name = "NAME=VALUE", value_parser = parse_header)]
    headers: Vec<(String, String)>,
}

#[derive(Debug, Args)]
pub struct DescribeArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Describe the response of a node instead of its request.
    #[arg(long)]
    response: bool,
}

/// Which body of a node call a command works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Body {
    Request,
    Response,
}

pub fn run(command: Command, config: &SwitchyardConfig) -> Result<String> {
    match command {
        Command::Resolve(args) => resolve(args, config),
        Command::Encode(args) => encode(args, config),
        Command::Decode(args) => decode(args, config),
        Command::Describe(args) => describe(args, config),
    }
}

fn resolve(args: ResolveArgs, config: &SwitchyardConfig) -> Result<String> {
    let mut manifest = load_manifest(args.manifest.as_deref(), config)?;
    let graphs = Resolver::default()
        .resolve_manifest(&mut manifest)
        .context("failed to resolve manifest")?;
    info!(flows = graphs.len(), "resolved manifest");
    Ok(serde_json::to_string_pretty(&graphs)?)
}

fn encode(args: EncodeArgs, config: &SwitchyardConfig) -> Result<String> {
    let manifest = resolved_manifest(&args.target, config)?;
    let flow = find_flow(&manifest, &args.target.flow)?;
    let mut parameters = target_parameters(flow, &args.target.target, Body::Request)?.clone();
    // The flow input has no references of its own; echo the stored input values.
    if args.target.target == INPUT_RESOURCE
        && let Some(property) = parameters.property.as_mut()
    {
        property.template.bind_reference(&PropertyReference::new(INPUT_RESOURCE, ""));
    }

    let content = fs::read_to_string(&args.values).with_context(|| format!("failed to read values {}", args.values.display()))?;
    let values: serde_json::Value =
        serde_json::from_str(&content).with_context(|| format!("failed to parse values {}", args.values.display()))?;
    let store = Store::new();
    store.store_json(&resource_path(INPUT_RESOURCE, ""), &values);
    debug!(entries = store.len(), "seeded input values");

    let codec = args.codec.as_deref().unwrap_or(&config.default_codec);
    let manager = Constructors::default()
        .new_manager(codec, &args.target.target, &parameters)
        .with_context(|| format!("failed to prepare the {codec} codec for '{}'", args.target.target))?;
    let payload = manager
        .marshal(&store)
        .with_context(|| format!("failed to encode '{}'", args.target.target))?;

    let mut output = String::new();
    for (name, value) in HeaderManager::new(&args.target.target, parameters.header.clone()).marshal(&store) {
        output.push_str(&format!("{name}: {value}\n"));
    }
    if !output.is_empty() {
        output.push('\n');
    }
    if codec == proto::NAME {
        output.push_str(&STANDARD.encode(&payload));
    } else {
        output.push_str(&String::from_utf8(payload).context("encoded payload is not valid UTF-8")?);
    }
    Ok(output)
}

fn decode(args: DecodeArgs, config: &SwitchyardConfig) -> Result<String> {
    let manifest = resolved_manifest(&args.target, config)?;
    let flow = find_flow(&manifest, &args.target.flow)?;
    let parameters = target_parameters(flow, &args.target.target, Body::Response)?;

    let mut payload = fs::read(&args.payload).with_context(|| format!("failed to read payload {}", args.payload.display()))?;
    if args.base64 {
        let text = String::from_utf8(payload).context("base64 payload is not valid UTF-8")?;
        payload = STANDARD.decode(text.trim()).context("payload is not valid base64")?;
    }

    let codec = args.codec.as_deref().unwrap_or(&config.default_codec);
    let resource = args.target.target.as_str();
    let manager = Constructors::default()
        .new_manager(codec, resource, parameters)
        .with_context(|| format!("failed to prepare the {codec} codec for '{resource}'"))?;

    let store = Store::new();
    manager
        .unmarshal(&payload, &store)
        .with_context(|| format!("failed to decode the payload for '{resource}'"))?;
    HeaderManager::new(resource, parameters.header.clone())
        .unmarshal(args.headers.iter().map(|(name, value)| (name.as_str(), value.as_str())), &store);

    Ok(serde_json::to_string_pretty(&store.snapshot())?)
}

fn describe(args: DescribeArgs, config: &SwitchyardConfig) -> Result<String> {
    let manifest = resolved_manifest(&args.target, config)?;
    let flow = find_flow(&manifest, &args.target.flow)?;
    let body = if args.response { Body::Response } else { Body::Request };
    let parameters = target_parameters(flow, &args.target.target, body)?;

    let manager = ProtoManager::new(args.target.target.as_str(), parameters.property.clone())
        .with_context(|| format!("'{}' has no protobuf representation", args.target.target))?;
    let descriptor = manager
        .descriptor()
        .ok_or_else(|| anyhow!("'{}' declares no body", args.target.target))?;
    Ok(descriptor.to_proto(Some(&flow.name().to_snake_case())))
}

fn load_manifest(path: Option<&Path>, config: &SwitchyardConfig) -> Result<FlowsManifest> {
    let Some(path) = path.or(config.manifest.as_deref()) else {
        bail!("no manifest given; pass --manifest or set `manifest` in the config file");
    };
    let content = fs::read_to_string(path).with_context(|| format!("failed to read manifest {}", path.display()))?;
    let manifest = if is_json(path) {
        FlowsManifest::from_json_str(&content).with_context(|| format!("failed to parse manifest {}", path.display()))?
    } else {
        FlowsManifest::from_yaml_str(&content).with_context(|| format!("failed to parse manifest {}", path.display()))?
    };
    debug!(flows = manifest.flows.len(), proxies = manifest.proxies.len(), "loaded manifest");
    Ok(manifest)
}

fn resolved_manifest(args: &TargetArgs, config: &SwitchyardConfig) -> Result<FlowsManifest> {
    let mut manifest = load_manifest(args.manifest.as_deref(), config)?;
    Resolver::default()
        .resolve_manifest(&mut manifest)
        .context("failed to resolve manifest")?;
    Ok(manifest)
}

fn find_flow<'m>(manifest: &'m FlowsManifest, name: &str) -> Result<&'m dyn FlowInterface> {
    manifest.get(name).ok_or_else(|| anyhow!("flow '{name}' is not declared"))
}

/// Parameters of `target`: the flow input, the flow output, or the request or response of a node call.
fn target_parameters<'f>(flow: &'f dyn FlowInterface, target: &str, body: Body) -> Result<&'f ParameterMap> {
    let parameters = match target {
        INPUT_RESOURCE => flow.input(),
        OUTPUT_RESOURCE => flow.output(),
        node_id => {
            let node = flow
                .node(node_id)
                .ok_or_else(|| anyhow!("flow '{}' has no node '{node_id}'", flow.name()))?;
            let call = node.call.as_ref().ok_or_else(|| anyhow!("node '{node_id}' declares no call"))?;
            match body {
                Body::Request => call.request.as_ref(),
                Body::Response => call.response.as_ref(),
            }
        }
    };
    parameters.ok_or_else(|| anyhow!("'{target}' declares no parameters"))
}

fn parse_header(value: &str) -> Result<(String, String), String> {
    value
        .split_once('=')
        .map(|(name, value)| (name.trim().to_string(), value.to_string()))
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| format!("expected NAME=VALUE, got '{value}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{TempDir, tempdir};

    const MANIFEST: &str = r#"
flows:
  - name: greet
    input:
      property:
        message:
          name: { scalar: { type: string } }
    nodes:
      - id: hello
        call:
          request:
            property:
              message:
                name: { reference: "input:name" }
          response:
            property:
              message:
                greeting: { scalar: { type: string } }
    output:
      property:
        message:
          greeting: { reference: "hello:greeting" }
"#;

    fn workspace() -> (TempDir, PathBuf) {
        let dir = tempdir().expect("tempdir");
        let manifest = dir.path().join("flows.yaml");
        fs::write(&manifest, MANIFEST).expect("write manifest");
        (dir, manifest)
    }

    fn target(manifest: &Path, target: &str) -> TargetArgs {
        TargetArgs {
            manifest: Some(manifest.to_path_buf()),
            flow: "greet".into(),
            target: target.into(),
        }
    }

    #[test]
    fn resolve_prints_dependency_graphs() {
        let (_dir, manifest) = workspace();
        let output = run(
            Command::Resolve(ResolveArgs {
                manifest: Some(manifest),
            }),
            &SwitchyardConfig::default(),
        )
        .expect("resolve");

        let graphs: serde_json::Value = serde_json::from_str(&output).expect("json");
        assert_eq!(graphs["greet"]["order"], serde_json::json!(["hello"]));
    }

    #[test]
    fn manifest_falls_back_to_the_config() {
        let (_dir, manifest) = workspace();
        let config = SwitchyardConfig {
            manifest: Some(manifest),
            ..SwitchyardConfig::default()
        };
        assert!(run(Command::Resolve(ResolveArgs { manifest: None }), &config).is_ok());

        let error = run(Command::Resolve(ResolveArgs { manifest: None }), &SwitchyardConfig::default()).expect_err("should fail");
        assert!(error.to_string().contains("no manifest given"));
    }

    #[test]
    fn encode_reads_node_requests_from_input_values() {
        let (dir, manifest) = workspace();
        let values = dir.path().join("values.json");
        fs::write(&values, r#"{"name": "Ada"}"#).expect("write values");

        let output = run(
            Command::Encode(EncodeArgs {
                target: target(&manifest, "hello"),
                codec: None,
                values: values.clone(),
            }),
            &SwitchyardConfig::default(),
        )
        .expect("encode");
        assert_eq!(output, r#"{"name":"Ada"}"#);

        let output = run(
            Command::Encode(EncodeArgs {
                target: target(&manifest, "input"),
                codec: Some("xml".into()),
                values,
            }),
            &SwitchyardConfig::default(),
        )
        .expect("encode");
        assert_eq!(output, "<input><name>Ada</name></input>");
    }

    #[test]
    fn decode_prints_the_store_snapshot() {
        let (dir, manifest) = workspace();
        let payload = dir.path().join("payload.json");
        fs::write(&payload, r#"{"greeting": "hi"}"#).expect("write payload");

        let output = run(
            Command::Decode(DecodeArgs {
                target: target(&manifest, "hello"),
                codec: None,
                payload,
                base64: false,
                headers: Vec::new(),
            }),
            &SwitchyardConfig::default(),
        )
        .expect("decode");

        let snapshot: serde_json::Value = serde_json::from_str(&output).expect("json");
        assert!(snapshot["values"].get("hello:greeting").is_some(), "unexpected snapshot: {output}");
    }

    #[test]
    fn describe_prints_proto_source() {
        let (_dir, manifest) = workspace();
        let output = run(
            Command::Describe(DescribeArgs {
                target: target(&manifest, "hello"),
                response: true,
            }),
            &SwitchyardConfig::default(),
        )
        .expect("describe");
        assert_eq!(output, "syntax = \"proto3\";\n\npackage greet;\n\nmessage Hello {\n  string greeting = 1;\n}\n");
    }

    #[test]
    fn unknown_targets_are_reported() {
        let (_dir, manifest) = workspace();
        let error = run(
            Command::Describe(DescribeArgs {
                target: target(&manifest, "missing"),
                response: false,
            }),
            &SwitchyardConfig::default(),
        )
        .expect_err("should fail");
        assert!(error.to_string().contains("has no node 'missing'"));
    }

    #[test]
    fn mixed_case_header_references_read_received_headers() {
        let mut manifest = FlowsManifest::from_yaml_str(
            r#"
flows:
  - name: fetch
    nodes:
      - id: first
        call:
          response:
            property:
              message:
                id: { scalar: { type: string } }
    output:
      property:
        message:
          etag: { reference: "first.header:ETag" }
"#,
        )
        .expect("manifest");
        Resolver::default().resolve_manifest(&mut manifest).expect("resolve");
        let flow = find_flow(&manifest, "fetch").expect("flow");

        let response = flow.nodes()[0].call.as_ref().and_then(|call| call.response.clone()).expect("response");
        let store = Store::new();
        HeaderManager::new("first", response.header).unmarshal([("ETag", "abc")], &store);

        let output = flow.output().cloned().expect("output");
        let payload = Constructors::default()
            .new_manager("json", OUTPUT_RESOURCE, &output)
            .expect("manager")
            .marshal(&store)
            .expect("marshal");
        assert_eq!(String::from_utf8(payload).expect("utf8"), r#"{"etag":"abc"}"#);
    }

    #[test]
    fn headers_parse_as_name_value_pairs() {
        assert_eq!(parse_header("X-Id=42").expect("header"), ("X-Id".to_string(), "42".to_string()));
        assert!(parse_header("no-separator").is_err());
        assert!(parse_header("=value").is_err());
    }
}
