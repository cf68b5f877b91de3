//! Built-in Kubernetes tool descriptors
//!
//! Only the catalog lives here. Implementations are bound by whichever
//! backend the host process wires up.

use crate::registry::{ToolCategory, ToolDescriptor};
use crate::schema::{ParamSpec, ParamType, ParamsSchema};

fn namespace() -> ParamSpec {
    ParamSpec::required("namespace", ParamType::String).describe("Target namespace")
}

fn pod_name() -> ParamSpec {
    ParamSpec::required("pod_name", ParamType::String).describe("Pod name")
}

fn tail_lines() -> ParamSpec {
    ParamSpec::optional("tail_lines", ParamType::Integer).describe("Number of trailing lines")
}

fn container() -> ParamSpec {
    ParamSpec::optional("container", ParamType::String).describe("Container name")
}

/// All built-in descriptors
#[must_use]
pub fn descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::new("list_pods", "List pods and their phase", ToolCategory::Query)
            .with_schema(ParamsSchema::new(vec![
                namespace(),
                ParamSpec::optional("label_selector", ParamType::String),
            ])),
        ToolDescriptor::new(
            "describe_pod",
            "Describe a pod including container states and events",
            ToolCategory::Query,
        )
        .with_schema(ParamsSchema::new(vec![namespace(), pod_name()])),
        ToolDescriptor::new("get_pod_logs", "Fetch container logs of a pod", ToolCategory::Logs)
            .with_schema(ParamsSchema::new(vec![
                namespace(),
                pod_name(),
                container(),
                tail_lines(),
                ParamSpec::optional("previous", ParamType::Boolean)
                    .describe("Read logs of the previous container instance"),
            ])),
        ToolDescriptor::new("get_events", "List namespace events", ToolCategory::Query)
            .with_schema(ParamsSchema::new(vec![
                namespace(),
                ParamSpec::optional("involved_object", ParamType::String)
                    .describe("Only events about this object"),
            ])),
        ToolDescriptor::new("list_jobs", "List jobs and completion status", ToolCategory::Query)
            .with_schema(ParamsSchema::new(vec![namespace()])),
        ToolDescriptor::new("describe_job", "Describe a job", ToolCategory::Query)
            .with_schema(ParamsSchema::new(vec![
                namespace(),
                ParamSpec::required("job_name", ParamType::String),
            ])),
        ToolDescriptor::new("get_job_logs", "Fetch logs of a job's pods", ToolCategory::Logs)
            .with_schema(ParamsSchema::new(vec![
                namespace(),
                ParamSpec::required("job_name", ParamType::String),
                tail_lines(),
            ])),
        ToolDescriptor::new(
            "get_deployment",
            "Show deployment spec and rollout status",
            ToolCategory::Query,
        )
        .with_schema(ParamsSchema::new(vec![
            namespace(),
            ParamSpec::required("name", ParamType::String),
        ])),
        ToolDescriptor::new("get_configmap", "Read a ConfigMap", ToolCategory::Query)
            .with_schema(ParamsSchema::new(vec![
                namespace(),
                ParamSpec::required("name", ParamType::String),
            ])),
        ToolDescriptor::new(
            "exec_in_pod",
            "Run a whitelisted read-only command inside a container",
            ToolCategory::Debug,
        )
        .with_schema(ParamsSchema::new(vec![
            namespace(),
            pod_name(),
            container(),
            ParamSpec::required("command", ParamType::String).describe("Command line to run"),
        ])),
        ToolDescriptor::new("restart_pod", "Delete a pod so its controller recreates it", ToolCategory::Operate)
            .with_schema(ParamsSchema::new(vec![namespace(), pod_name()])),
        ToolDescriptor::new(
            "delete_job",
            "Delete a job and, in the background, its pods",
            ToolCategory::Operate,
        )
        .with_schema(ParamsSchema::new(vec![
            namespace(),
            ParamSpec::required("job_name", ParamType::String),
        ])),
    ]
}
