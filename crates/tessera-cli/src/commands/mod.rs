pub mod build;
pub mod dev;

use tessera_build::Overrides;

/// Flags that override tessera.toml
fn overrides(port: Option<u16>, production: bool) -> Overrides {
    Overrides {
        port,
        production: production.then_some(true),
    }
}

fn runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread().enable_all().build()
}
