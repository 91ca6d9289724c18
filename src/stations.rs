use serde::Serialize;

use crate::pipeline::Pipeline;

/// One row of `stw stations`.
#[derive(Debug, Clone, Serialize)]
pub struct StationStatus {
    pub id: usize,
    pub kind: String,
    pub description: String,
    pub status: &'static str,
    pub error: Option<String>,
}

pub fn station_statuses(pipeline: &Pipeline) -> Vec<StationStatus> {
    pipeline
        .configured_stations()
        .iter()
        .map(|cs| StationStatus {
            id: cs.id.0,
            kind: cs.kind.clone(),
            description: cs.description.clone(),
            status: match (cs.enabled, &cs.error) {
                (true, _) => "OK",
                (false, Some(_)) => "UNAVAILABLE",
                (false, None) => "INACTIVE",
            },
            error: cs.error.clone(),
        })
        .collect()
}

pub fn list_stations(pipeline: &Pipeline) {
    println!("{:<4} {:<12} {:<10} DESCRIPTION", "ID", "STATUS", "TYPE");
    for s in station_statuses(pipeline) {
        println!("{:<4} {:<12} {:<10} {}", s.id, s.status, s.kind, s.description);
        if let Some(err) = &s.error {
            println!("     {}", err);
        }
    }
}

pub fn list_roles(pipeline: &Pipeline) {
    let roles = pipeline.roles();
    if roles.is_empty() {
        println!("No roles configured.");
    }
    for role in roles {
        println!("{}", role);
    }
}

pub fn list_operations(pipeline: &Pipeline) {
    println!("{:<14} {:<9} LABEL", "CODE", "OPERANDS");
    for op in pipeline.configured_operations() {
        println!("{:<14} {:<9} {}", op.op_code, op.operand_count, op.label);
    }
}
