//! Workload specification generator.
//!
//! Pure function of the unit configuration; never touches the database.

use common::{ContainerPort, ContainerSpec, PodSpec, UnitConfig};

/// Build the workload spec for the database container.
pub fn pod_spec(config: &UnitConfig) -> PodSpec {
    let container = ContainerSpec {
        name: config.app_name.clone(),
        image: config.image.clone(),
        args: vec![
            "mongod".to_string(),
            "--bind_ip_all".to_string(),
            "--port".to_string(),
            config.port.to_string(),
            "--replSet".to_string(),
            config.replica_set_name.clone(),
        ],
        ports: vec![ContainerPort {
            name: config.app_name.clone(),
            container_port: config.port,
            protocol: "TCP".to_string(),
        }],
    };

    PodSpec {
        containers: vec![container],
    }
}
