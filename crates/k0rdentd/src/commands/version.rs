use k0rdentd_airgap::{BuildMetadata, Flavor};

pub fn handle(json: bool) -> anyhow::Result<()> {
    let metadata = BuildMetadata::current();

    if json {
        println!("{}", serde_json::to_string_pretty(&metadata)?);
        return Ok(());
    }

    println!("k0rdentd {} ({})", metadata.version, metadata.flavor);
    if metadata.is_airgap() {
        println!("  k0s:     {}", metadata.k0s_version);
        println!("  k0rdent: {}", metadata.k0rdent_version);
    }
    println!("  built:   {}", metadata.build_time);
    Ok(())
}

pub fn show_flavor() {
    println!("{}", Flavor::current());
}
