use std::env;
use std::path::PathBuf;

fn fallback_dotenv_path(yb_home: Option<PathBuf>, cwd: Option<PathBuf>) -> Option<PathBuf> {
    let base = yb_home.or(cwd)?;
    Some(base.join(".env"))
}

pub fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let fallback = fallback_dotenv_path(
        env::var_os("YB_HOME").map(PathBuf::from),
        env::current_dir().ok(),
    );

    let Some(path) = fallback else {
        return;
    };
    if path.is_file() {
        let _ = dotenvy::from_path(&path);
    }
}
