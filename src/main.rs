use jinterp::VM;
use log::{error, LevelFilter};
use simplelog::*;
use std::env;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process;

const LOG_FILE: &str = "jinterp.log";
const LOG_LEVEL_VAR: &str = "JINTERP_LOG";

fn log_level() -> LevelFilter {
    env::var(LOG_LEVEL_VAR)
        .ok()
        .and_then(|level| level.parse().ok())
        .unwrap_or(LevelFilter::Info)
}

/// `Foo`, `Foo.class` or `dir/Foo.class` to (classpath, class name).
fn resolve_target(target: &str, classpath: Option<&String>) -> (PathBuf, String) {
    let name = target.strip_suffix(".class").unwrap_or(target);
    if let Some(classpath) = classpath {
        return (PathBuf::from(classpath), name.to_string());
    }
    let path = Path::new(name);
    match (path.parent(), path.file_name()) {
        (Some(dir), Some(file)) if !dir.as_os_str().is_empty() && target.ends_with(".class") => {
            (dir.to_path_buf(), file.to_string_lossy().into_owned())
        }
        _ => (PathBuf::from("."), name.to_string()),
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("usage: jinterp <ClassName | path/to/ClassName.class> [classpath]");
        process::exit(2);
    }

    if let Ok(log_file) = File::create(LOG_FILE) {
        let _ = WriteLogger::init(
            log_level(),
            ConfigBuilder::new()
                .set_time_level(LevelFilter::Off)
                .set_thread_level(LevelFilter::Off)
                .set_target_level(LevelFilter::Off)
                .build(),
            log_file,
        );
    }

    let (classpath, class_name) = resolve_target(&args[1], args.get(2));
    let mut vm = VM::new(classpath);
    if let Err(e) = vm.start(&class_name) {
        error!("{}", e);
        let _ = vm.flush();
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_target() {
        assert_eq!(
            resolve_target("Square", None),
            (PathBuf::from("."), "Square".to_string())
        );
        assert_eq!(
            resolve_target("out/Square.class", None),
            (PathBuf::from("out"), "Square".to_string())
        );
        let classpath = "build".to_string();
        assert_eq!(
            resolve_target("demo/Square", Some(&classpath)),
            (PathBuf::from("build"), "demo/Square".to_string())
        );
    }
}
