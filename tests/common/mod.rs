use std::io;
use std::path::PathBuf;

/// Create a fresh world directory with a database backend configured
pub fn tear_up(name: &str) -> io::Result<PathBuf> {
    let dir = std::env::temp_dir().join(format!("mtmap-it-{}-{name}", std::process::id()));
    if dir.exists() {
        std::fs::remove_dir_all(&dir)?;
    }
    std::fs::create_dir_all(&dir)?;
    std::fs::write(
        dir.join("world.mt"),
        "gameid = minetest\nbackend = sqlite3\n",
    )?;
    Ok(dir)
}

pub fn tear_down(dir: &PathBuf) -> io::Result<()> {
    std::fs::remove_dir_all(dir)
}
