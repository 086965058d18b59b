use crate::RegistryArgs;
use crate::utils;
use anyhow::Context;
use k0rdentd_airgap::{DaemonOptions, RegistryDaemon};
use k0rdentd_runtime::CancellationToken;

pub async fn handle(args: RegistryArgs, dry_run: bool) -> anyhow::Result<()> {
    let options = DaemonOptions {
        bundle_path: args.bundle_path,
        host: args.host,
        port: args.port,
        storage_dir: args.storage,
        verify_signature: args.verify,
        cosign_key: args.cosign_key,
        push_concurrency: args.push_concurrency.max(1),
    };

    if dry_run {
        let mut steps = Vec::new();
        if options.verify_signature {
            steps.push(format!(
                "Verify {} with cosign key {}",
                options.bundle_path.display(),
                options.cosign_key
            ));
        }
        steps.push(format!(
            "Serve a registry on {} backed by {}",
            options.address(),
            options.storage_dir.display()
        ));
        steps.push(format!(
            "Push every image in {} ({} at a time)",
            options.bundle_path.display(),
            options.push_concurrency
        ));
        utils::dry_run_steps(&steps);
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received interrupt, shutting down registry");
            on_signal.cancel();
        }
    });

    let address = options.address();
    RegistryDaemon::new(options)
        .run(cancel)
        .await
        .with_context(|| format!("registry daemon on {} failed", address))?;

    utils::success("Registry stopped");
    Ok(())
}
