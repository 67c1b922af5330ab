//! # CRD Generator
//!
//! Prints the `MeshControlPlane` and `MeshGateway` CustomResourceDefinitions as
//! one multi-document YAML stream.
//!
//! ## Usage
//!
//! ```bash
//! # Generate CRD YAML
//! cargo run --bin crdgen > config/crd/mesh.yaml
//!
//! # Generate and apply directly
//! cargo run --bin crdgen | kubectl apply -f -
//!
//! # Write to a file
//! cargo run --bin crdgen -- --output config/crd/mesh.yaml
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use kube::core::CustomResourceExt;
use mesh_operator::crd::{MeshControlPlane, MeshGateway};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "crdgen", about = "Print the mesh operator CRDs as YAML")]
struct Args {
    /// Write to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn render() -> Result<String> {
    let mut out = String::from(
        "# This file is auto-generated by crdgen\n\
         # DO NOT EDIT THIS FILE MANUALLY\n\
         # Fix schema issues in src/crd and regenerate\n",
    );
    for crd in [MeshControlPlane::crd(), MeshGateway::crd()] {
        let name = crd.metadata.name.clone().unwrap_or_default();
        let yaml = serde_yaml::to_string(&crd)
            .with_context(|| format!("Failed to serialize CRD {name} to YAML"))?;
        out.push_str("---\n");
        out.push_str(&yaml);
    }
    Ok(out)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let yaml = render()?;
    match args.output {
        Some(path) => std::fs::write(&path, yaml)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => print!("{yaml}"),
    }
    Ok(())
}
