use serde::{Deserialize, Serialize};
use std::fmt;

/// Port type that is compatible with every other port type.
pub const ANY_PORT_TYPE: &str = "any";

/// Category of a task, in workflow precedence order.
///
/// Precedence ranks:
/// - `Setup` (0)
/// - `Execution` (1)
/// - `Testing` (2)
/// - `Integration` / `Review` (3)
/// - `Utility` (4), also accepted as `deployment`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Setup,
    Execution,
    Testing,
    Integration,
    Review,
    #[serde(alias = "deployment")]
    Utility,
}

impl Category {
    /// Precedence rank used for inferred ordering and ordering checks.
    pub fn stage(&self) -> u8 {
        match self {
            Category::Setup => 0,
            Category::Execution => 1,
            Category::Testing => 2,
            Category::Integration | Category::Review => 3,
            Category::Utility => 4,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Setup => write!(f, "setup"),
            Category::Execution => write!(f, "execution"),
            Category::Testing => write!(f, "testing"),
            Category::Integration => write!(f, "integration"),
            Category::Review => write!(f, "review"),
            Category::Utility => write!(f, "utility"),
        }
    }
}

/// A named, typed input or output declared by a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortSpec {
    pub name: String,
    #[serde(rename = "type", default = "default_port_type")]
    pub ty: String,
    #[serde(default)]
    pub required: bool,
}

fn default_port_type() -> String {
    ANY_PORT_TYPE.to_string()
}

impl PortSpec {
    pub fn required(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ty: default_port_type(),
            required: true,
        }
    }

    pub fn optional(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ty: default_port_type(),
            required: false,
        }
    }

    pub fn with_type(mut self, ty: &str) -> Self {
        self.ty = ty.to_string();
        self
    }

    /// Whether a value produced on `self` can feed `other`.
    pub fn is_compatible_with(&self, other: &PortSpec) -> bool {
        self.name == other.name
            && (self.ty == other.ty || self.ty == ANY_PORT_TYPE || other.ty == ANY_PORT_TYPE)
    }
}

/// A selectable unit of work. Immutable once loaded into a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    pub version: String,
    pub category: Category,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub inputs: Vec<PortSpec>,
    #[serde(default)]
    pub outputs: Vec<PortSpec>,
    /// Estimated duration in minutes
    #[serde(default)]
    pub estimated_duration: u64,
    #[serde(default)]
    pub estimated_cost: u64,
    /// A non-critical task may fail without failing the whole execution
    #[serde(default = "default_critical")]
    pub critical: bool,
}

fn default_critical() -> bool {
    true
}

impl TaskSpec {
    pub fn new(name: &str, version: &str, category: Category) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            category,
            summary: String::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            estimated_duration: 0,
            estimated_cost: 0,
            critical: true,
        }
    }

    /// Stable node id in `name@version` form.
    pub fn id(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }

    pub fn with_duration(mut self, minutes: u64) -> Self {
        self.estimated_duration = minutes;
        self
    }

    pub fn with_input(mut self, port: PortSpec) -> Self {
        self.inputs.push(port);
        self
    }

    pub fn with_output(mut self, port: PortSpec) -> Self {
        self.outputs.push(port);
        self
    }

    pub fn non_critical(mut self) -> Self {
        self.critical = false;
        self
    }
}
