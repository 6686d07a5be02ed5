//! ---
//! vigil_section: "14-versioning"
//! vigil_subsection: "binary"
//! vigil_type: "source"
//! vigil_scope: "code"
//! vigil_description: "Build script embedding build metadata into vigilctl."
//! vigil_version: "v0.0.0-prealpha"
//! vigil_owner: "tbd"
//! ---
use vergen::EmitBuilder;

fn main() -> anyhow::Result<()> {
    EmitBuilder::builder()
        .build_timestamp()
        .cargo_target_triple()
        .cargo_opt_level()
        .emit()?;
    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
