//! Workflow definitions: steps, ports, input channels, and data pipes.
//!
//! Definitions are immutable once created and content-addressed by their own
//! structure, so resubmitting an identical workflow resolves to the same id.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::ValidationError;
use crate::id::object_id;

/// A named file slot on a step. `file_path` is relative to the step's
/// working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
  pub name: String,
  pub file_path: String,
}

/// Addresses one port on one step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRef {
  pub step: String,
  pub port: String,
}

/// Advisory resource requirements for one step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cores: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub memory: Option<String>,
}

/// Execution environment for one step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub docker_image: Option<String>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub variables: BTreeMap<String, String>,
}

/// One execution unit of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
  pub name: String,
  pub command: String,
  #[serde(default)]
  pub environment: Environment,
  #[serde(default)]
  pub resources: ResourceRequest,
  #[serde(default)]
  pub input_ports: Vec<Port>,
  #[serde(default)]
  pub output_ports: Vec<Port>,
}

impl Step {
  pub fn input_port(&self, name: &str) -> Option<&Port> {
    self.input_ports.iter().find(|p| p.name == name)
  }

  pub fn output_port(&self, name: &str) -> Option<&Port> {
    self.output_ports.iter().find(|p| p.name == name)
  }
}

/// A named channel run requests bind data objects to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowInput {
  pub channel: String,
  pub destination: PortRef,
}

/// Wires one step's output port into another step's input port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPipe {
  pub source: PortRef,
  pub destination: PortRef,
}

/// A step-based workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
  pub name: String,
  pub steps: Vec<Step>,
  #[serde(default)]
  pub inputs: Vec<WorkflowInput>,
  #[serde(default)]
  pub data_pipes: Vec<DataPipe>,
}

impl Workflow {
  /// Content-derived id of this definition.
  pub fn id(&self) -> Result<String, serde_json::Error> {
    object_id(self)
  }

  pub fn step(&self, name: &str) -> Option<&Step> {
    self.steps.iter().find(|s| s.name == name)
  }

  /// Structural validation at creation time. Nothing is persisted when any
  /// rule fails.
  pub fn validate(&self) -> Result<(), ValidationError> {
    if self.name.trim().is_empty() {
      return Err(malformed("workflow name must not be empty"));
    }

    let mut step_names = HashSet::new();
    for step in &self.steps {
      if step.name.trim().is_empty() {
        return Err(malformed("step name must not be empty"));
      }
      if !step_names.insert(step.name.as_str()) {
        return Err(malformed(&format!("duplicate step name '{}'", step.name)));
      }
      if step.command.trim().is_empty() {
        return Err(malformed(&format!("step '{}' has an empty command", step.name)));
      }
      let mut port_names = HashSet::new();
      for port in step.input_ports.iter().chain(&step.output_ports) {
        if !port_names.insert(port.name.as_str()) {
          return Err(malformed(&format!(
            "step '{}' declares port '{}' more than once",
            step.name, port.name
          )));
        }
      }
    }

    let mut channels = HashSet::new();
    let mut bound_inputs = HashSet::new();
    for input in &self.inputs {
      if !channels.insert(input.channel.as_str()) {
        return Err(malformed(&format!("duplicate channel '{}'", input.channel)));
      }
      self.require_input_port(&input.destination)?;
      if !bound_inputs.insert(&input.destination) {
        return Err(malformed(&format!(
          "input port '{}.{}' is bound more than once",
          input.destination.step, input.destination.port
        )));
      }
    }

    for pipe in &self.data_pipes {
      self.require_output_port(&pipe.source)?;
      self.require_input_port(&pipe.destination)?;
      if !bound_inputs.insert(&pipe.destination) {
        return Err(malformed(&format!(
          "input port '{}.{}' is bound more than once",
          pipe.destination.step, pipe.destination.port
        )));
      }
    }

    Ok(())
  }

  fn require_input_port(&self, port_ref: &PortRef) -> Result<(), ValidationError> {
    let step = self
      .step(&port_ref.step)
      .ok_or_else(|| malformed(&format!("unknown step '{}'", port_ref.step)))?;
    if step.input_port(&port_ref.port).is_none() {
      return Err(malformed(&format!(
        "step '{}' has no input port '{}'",
        port_ref.step, port_ref.port
      )));
    }
    Ok(())
  }

  fn require_output_port(&self, port_ref: &PortRef) -> Result<(), ValidationError> {
    let step = self
      .step(&port_ref.step)
      .ok_or_else(|| malformed(&format!("unknown step '{}'", port_ref.step)))?;
    if step.output_port(&port_ref.port).is_none() {
      return Err(malformed(&format!(
        "step '{}' has no output port '{}'",
        port_ref.step, port_ref.port
      )));
    }
    Ok(())
  }
}

fn malformed(message: &str) -> ValidationError {
  ValidationError::MalformedWorkflow {
    message: message.to_string(),
  }
}
