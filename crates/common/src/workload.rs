use serde::{Deserialize, Serialize};

/// Declarative workload handed to the orchestration platform.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PodSpec {
    pub containers: Vec<ContainerSpec>,
}

impl PodSpec {
    pub fn container(&self, name: &str) -> Option<&ContainerSpec> {
        self.containers.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub args: Vec<String>,
    #[serde(default)]
    pub ports: Vec<ContainerPort>,
}

impl ContainerSpec {
    /// Value following `flag` in the argument list.
    pub fn arg_value(&self, flag: &str) -> Option<&str> {
        let idx = self.args.iter().position(|a| a == flag)?;
        self.args.get(idx + 1).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    pub name: String,
    pub container_port: u16,
    pub protocol: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arg_value_lookup() {
        let container = ContainerSpec {
            name: "mongodb".into(),
            image: "mongodb:4.4.1".into(),
            args: vec!["mongod".into(), "--replSet".into(), "rs0".into()],
            ports: Vec::new(),
        };
        assert_eq!(container.arg_value("--replSet"), Some("rs0"));
        assert_eq!(container.arg_value("--keyFile"), None);
    }
}
