//! KDL parsing of the static configuration.

use jobgate_core::job::{
    Brancher, Container, EnvVar, JobBase, Periodic, PodSpec, Postsubmit, Presubmit, Preset,
    Reporter,
};
use kdl::{KdlDocument, KdlNode};

use crate::config::{Config, InRepoSettings, PubsubTrigger};
use crate::{ConfigError, ConfigResult};

/// Parse a configuration document. No defaulting or validation happens here.
pub fn parse_config(kdl: &str) -> ConfigResult<Config> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "pod-namespace" => {
                config.pod_namespace = get_first_string_arg(node);
            }
            "in-repo-config" => {
                config.in_repo_config = parse_in_repo_settings(node)?;
            }
            "pubsub-trigger" => {
                config.pubsub_triggers.push(parse_pubsub_trigger(node)?);
            }
            "preset" => {
                config.presets.push(parse_preset(node));
            }
            "periodic" => {
                config.periodics.push(parse_periodic(node)?);
            }
            "presubmit" => {
                let (repo, base) = parse_repo_job(node, "presubmit")?;
                let job = parse_presubmit(node, base);
                config.presubmits.entry(repo).or_default().push(job);
            }
            "postsubmit" => {
                let (repo, base) = parse_repo_job(node, "postsubmit")?;
                let job = Postsubmit {
                    base,
                    brancher: parse_brancher(node),
                    reporter: parse_reporter(node),
                    run_if_changed: get_string_prop(node, "run-if-changed"),
                };
                config.postsubmits.entry(repo).or_default().push(job);
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(config)
}

fn parse_in_repo_settings(node: &KdlNode) -> ConfigResult<InRepoSettings> {
    let mut settings = InRepoSettings::default();
    let Some(children) = node.children() else {
        return Ok(settings);
    };
    for child in children.nodes() {
        match child.name().value() {
            "enabled" => {
                let key = get_first_string_arg(child).ok_or_else(|| {
                    ConfigError::MissingField("in-repo-config enabled scope".to_string())
                })?;
                let enabled = child
                    .entries()
                    .iter()
                    .filter(|e| e.name().is_none())
                    .find_map(|e| e.value().as_bool())
                    .unwrap_or(true);
                settings.enabled.insert(key, enabled);
            }
            "allowed-clusters" => {
                let mut args = get_all_string_args(child).into_iter();
                let key = args.next().ok_or_else(|| {
                    ConfigError::MissingField("in-repo-config allowed-clusters scope".to_string())
                })?;
                settings
                    .allowed_clusters
                    .entry(key)
                    .or_default()
                    .extend(args);
            }
            _ => {}
        }
    }
    Ok(settings)
}

fn parse_pubsub_trigger(node: &KdlNode) -> ConfigResult<PubsubTrigger> {
    let mut args = get_all_string_args(node).into_iter();
    let project = args
        .next()
        .ok_or_else(|| ConfigError::MissingField("pubsub-trigger project".to_string()))?;
    let mut trigger = PubsubTrigger {
        project,
        subscriptions: args.collect(),
        ..Default::default()
    };

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "subscription" => trigger.subscriptions.extend(get_all_string_args(child)),
                "allowed-clusters" => trigger.allowed_clusters.extend(get_all_string_args(child)),
                "max-outstanding-messages" => {
                    let value = get_first_int_arg(child).ok_or_else(|| {
                        ConfigError::InvalidValue {
                            field: "max-outstanding-messages".to_string(),
                            message: "expected an integer".to_string(),
                        }
                    })?;
                    trigger.max_outstanding_messages = Some(value);
                }
                _ => {}
            }
        }
    }
    Ok(trigger)
}

fn parse_preset(node: &KdlNode) -> Preset {
    let mut preset = Preset::default();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "label" => {
                    if let Some((k, v)) = get_pair(child) {
                        preset.labels.insert(k, v);
                    }
                }
                "env" => {
                    if let Some((k, v)) = get_pair(child) {
                        preset.env.push(EnvVar::new(k, v));
                    }
                }
                _ => {}
            }
        }
    }
    preset
}

fn parse_periodic(node: &KdlNode) -> ConfigResult<Periodic> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("periodic name".to_string()))?;
    Ok(Periodic {
        base: parse_job_base(node, name)?,
        cron: get_string_prop(node, "cron"),
        interval: get_string_prop(node, "interval"),
    })
}

/// Presubmits and postsubmits take `"org/repo" "name"` arguments.
fn parse_repo_job(node: &KdlNode, kind: &str) -> ConfigResult<(String, JobBase)> {
    let mut args = get_all_string_args(node).into_iter();
    let repo = args
        .next()
        .ok_or_else(|| ConfigError::MissingField(format!("{kind} repository")))?;
    let name = args
        .next()
        .ok_or_else(|| ConfigError::MissingField(format!("{kind} name")))?;
    let base = parse_job_base(node, name)?;
    Ok((repo, base))
}

fn parse_presubmit(node: &KdlNode, base: JobBase) -> Presubmit {
    Presubmit {
        base,
        brancher: parse_brancher(node),
        reporter: parse_reporter(node),
        always_run: get_bool_prop(node, "always-run").unwrap_or(false),
        optional: get_bool_prop(node, "optional").unwrap_or(false),
        run_if_changed: get_string_prop(node, "run-if-changed"),
        trigger: get_string_prop(node, "trigger"),
        rerun_command: get_string_prop(node, "rerun-command"),
    }
}

fn parse_brancher(node: &KdlNode) -> Brancher {
    Brancher {
        branches: get_child_args(node, "branches"),
        skip_branches: get_child_args(node, "skip-branches"),
    }
}

fn parse_reporter(node: &KdlNode) -> Reporter {
    Reporter {
        context: get_string_prop(node, "context").unwrap_or_default(),
        skip_report: get_bool_prop(node, "skip-report").unwrap_or(false),
    }
}

fn parse_job_base(node: &KdlNode, name: String) -> ConfigResult<JobBase> {
    let mut base = JobBase::new(name);
    base.cluster = get_string_prop(node, "cluster").unwrap_or_default();
    base.namespace = get_string_prop(node, "namespace");
    if let Some(max) = get_int_prop(node, "max-concurrency") {
        base.max_concurrency = u32::try_from(max).map_err(|_| ConfigError::InvalidValue {
            field: format!("max-concurrency of job '{}'", base.name),
            message: format!("{max} is out of range"),
        })?;
    }

    let Some(children) = node.children() else {
        return Ok(base);
    };

    let mut spec = PodSpec::default();
    for child in children.nodes() {
        match child.name().value() {
            "label" => {
                if let Some((k, v)) = get_pair(child) {
                    base.labels.insert(k, v);
                }
            }
            "annotation" => {
                if let Some((k, v)) = get_pair(child) {
                    base.annotations.insert(k, v);
                }
            }
            "container" => spec.containers.push(parse_container(child)?),
            "service-account" => spec.service_account_name = get_first_string_arg(child),
            "node-selector" => {
                if let Some((k, v)) = get_pair(child) {
                    spec.node_selector.insert(k, v);
                }
            }
            _ => {}
        }
    }
    if !spec.containers.is_empty() {
        base.spec = Some(spec);
    }
    Ok(base)
}

fn parse_container(node: &KdlNode) -> ConfigResult<Container> {
    let image = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("container image".to_string()))?;
    let mut container = Container {
        name: get_string_prop(node, "name").unwrap_or_default(),
        image,
        ..Default::default()
    };

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "command" => container.command = get_all_string_args(child),
                "args" => container.args = get_all_string_args(child),
                "working-dir" => container.working_dir = get_first_string_arg(child),
                "env" => {
                    if let Some((k, v)) = get_pair(child) {
                        container.env.push(EnvVar::new(k, v));
                    }
                }
                _ => {}
            }
        }
    }
    Ok(container)
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_first_int_arg(node: &KdlNode) -> Option<i64> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
        .and_then(|i| i64::try_from(i).ok())
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

/// The first two positional string arguments, e.g. `label "key" "value"`.
fn get_pair(node: &KdlNode) -> Option<(String, String)> {
    let mut args = get_all_string_args(node).into_iter();
    Some((args.next()?, args.next()?))
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn get_bool_prop(node: &KdlNode, name: &str) -> Option<bool> {
    node.get(name).and_then(|v| v.as_bool())
}

fn get_int_prop(node: &KdlNode, name: &str) -> Option<i128> {
    node.get(name).and_then(|v| v.as_integer())
}

/// Arguments of every child called `name`, concatenated.
fn get_child_args(node: &KdlNode, name: &str) -> Vec<String> {
    node.children()
        .map(|children| {
            children
                .nodes()
                .iter()
                .filter(|c| c.name().value() == name)
                .flat_map(get_all_string_args)
                .collect()
        })
        .unwrap_or_default()
}
