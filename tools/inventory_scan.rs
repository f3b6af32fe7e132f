use std::env;
use std::path::PathBuf;

use common::{normalize, RemoteItem};
use library::{classify, scan_folder, Classification, IdentityStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Prints how a download folder is indexed and, for any titles given after
/// the folder, whether they would be dispatched.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = env::args().skip(1);
    let folder = args
        .next()
        .ok_or("usage: inventory_scan <folder> [title...]")?;
    let titles: Vec<String> = args.collect();
    let history_path =
        env::var("HISTORY_PATH").unwrap_or_else(|_| "download_history.json".into());
    let id_map_path = env::var("ID_MAP_PATH").unwrap_or_else(|_| "id_map.json".into());

    let inventory = scan_folder(&PathBuf::from(&folder));
    info!("Scanned {} files in {}", inventory.len(), folder);
    let mut entries: Vec<(&str, &str)> = inventory.iter().collect();
    entries.sort();
    for (key, filename) in entries {
        println!("{}\t{}", key, filename);
    }

    if titles.is_empty() {
        return Ok(());
    }
    let identity =
        IdentityStore::open(&PathBuf::from(history_path), &PathBuf::from(id_map_path))?;
    println!();
    for title in titles {
        let item = RemoteItem {
            id: String::new(),
            title: title.clone(),
            url: String::new(),
        };
        let verdict = match classify(&item, &inventory, &identity) {
            Classification::Present(reason) => format!("present ({:?})", reason),
            Classification::NeedsDispatch => "dispatch".to_string(),
        };
        println!("{}\t[{}]\t{}", title, normalize(&title), verdict);
    }
    Ok(())
}
