use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!(
        "memory_calculator_it_{}_{}_{}",
        std::process::id(),
        nanos,
        name
    ))
}

fn write_file(path: &Path, content: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

fn jar_bytes(entries: &[(&str, &[u8])]) -> anyhow::Result<Vec<u8>> {
    use std::io::Write;
    use zip::write::FileOptions;

    let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (name, content) in entries {
        zip.start_file(*name, options)?;
        zip.write_all(content)?;
    }
    Ok(zip.finish()?.into_inner())
}

/// An exploded Spring Boot style app: 2 loose classes, a WAR with 3 classes and
/// a library JAR holding 4 more.
fn write_fixture_app(root: &Path) -> anyhow::Result<()> {
    let library = jar_bytes(&[
        ("org/lib/A.class", b""),
        ("org/lib/B.class", b""),
        ("org/lib/C.class", b""),
        ("org/lib/script.groovy", b""),
        ("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0"),
    ])?;
    let war = jar_bytes(&[
        ("WEB-INF/classes/com/example/App.class", b""),
        ("WEB-INF/classes/com/example/Web.class", b""),
        ("WEB-INF/classes/com/example/Repo.class", b""),
        ("WEB-INF/lib/library.jar", &library),
    ])?;
    write_file(&root.join("webapps/app.war"), &war)?;
    write_file(&root.join("BOOT-INF/classes/Main.class"), b"")?;
    write_file(&root.join("BOOT-INF/classes/Config.groovy"), b"")?;
    write_file(&root.join("README.md"), b"fixture")?;
    Ok(())
}

fn run(args: &[&str]) -> anyhow::Result<Output> {
    run_with_env(args, &[])
}

fn run_with_env(args: &[&str], envs: &[(&str, &str)]) -> anyhow::Result<Output> {
    let bin = env!("CARGO_BIN_EXE_memory-calculator");
    let mut cmd = Command::new(bin);
    cmd.args(args)
        .env_remove("MEMORY_CALCULATOR_CONFIG")
        .env_remove("MEMORY_CALCULATOR_CONFIG_FILE")
        .env_remove("MEMORY_CALCULATOR");
    for (k, v) in envs {
        cmd.env(k, v);
    }
    Ok(cmd.output()?)
}

fn run_ok(args: &[&str]) -> anyhow::Result<String> {
    run_ok_with_env(args, &[])
}

fn run_ok_with_env(args: &[&str], envs: &[(&str, &str)]) -> anyhow::Result<String> {
    let out = run_with_env(args, envs)?;
    if !out.status.success() {
        return Err(anyhow::anyhow!(
            "command failed: status={:?}, stderr={}",
            out.status.code(),
            String::from_utf8_lossy(&out.stderr)
        ));
    }
    Ok(String::from_utf8(out.stdout)?)
}

#[test]
fn count_reports_classes_through_nested_archives() -> anyhow::Result<()> {
    let base = temp_dir("count");
    let app = base.join("app");
    let empty = base.join("empty");
    write_fixture_app(&app)?;
    std::fs::create_dir_all(&empty)?;

    let stdout = run_ok(&[
        "count",
        app.to_string_lossy().as_ref(),
        empty.to_string_lossy().as_ref(),
    ])?;
    let json: Value = serde_json::from_str(&stdout)?;

    assert_eq!(json[0]["loaded_classes"], Value::from(2 + 3 + 4));
    assert_eq!(json[0]["root"], Value::String(app.to_string_lossy().to_string()));
    assert_eq!(json[1]["loaded_classes"], Value::from(0));

    let _ = std::fs::remove_dir_all(base);
    Ok(())
}

#[test]
fn invocation_uses_config_and_counted_classes() -> anyhow::Result<()> {
    let base = temp_dir("invocation");
    let app = base.join("app");
    let config = base.join("calculator.yml");
    write_fixture_app(&app)?;
    write_file(
        &config,
        b"stack_threads: 200\nvm_options:\n  Xss: 228K\n  XX:MaxMetaspaceSize=: 64M\n",
    )?;

    let stdout = run_ok(&[
        "invocation",
        "--config",
        config.to_string_lossy().as_ref(),
        "--root",
        app.to_string_lossy().as_ref(),
        "--calculator",
        "/calc/bin/mc",
    ])?;

    assert_eq!(
        stdout.trim_end(),
        "/calc/bin/mc -totMemory=$MEMORY_LIMIT -stackThreads=200 -loadedClasses=9 -vmOptions=\"-Xss228K -XX:MaxMetaspaceSize=64M\""
    );

    let _ = std::fs::remove_dir_all(base);
    Ok(())
}

#[test]
fn invocation_export_qualifies_calculator_and_honours_override() -> anyhow::Result<()> {
    let base = temp_dir("export");
    let config = base.join("calculator.yml");
    write_file(&config, b"class_count: 1000\n")?;
    let calculator = base.join("droplet/.java-buildpack/jre/bin/mc");

    let stdout = run_ok(&[
        "invocation",
        "--config",
        config.to_string_lossy().as_ref(),
        "--root",
        base.join("not-staged-yet").to_string_lossy().as_ref(),
        "--calculator",
        calculator.to_string_lossy().as_ref(),
        "--relative-to",
        base.join("droplet").to_string_lossy().as_ref(),
        "--export",
    ])?;

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(
        lines,
        vec![
            "CALCULATED_MEMORY=$($PWD/.java-buildpack/jre/bin/mc -totMemory=$MEMORY_LIMIT -stackThreads=250 -loadedClasses=1000)",
            "export JAVA_OPTS=\"$JAVA_OPTS $CALCULATED_MEMORY\"",
        ]
    );

    let _ = std::fs::remove_dir_all(base);
    Ok(())
}

#[test]
fn inline_env_override_replaces_class_count_and_keeps_option_order() -> anyhow::Result<()> {
    let base = temp_dir("env_override");
    let config = base.join("calculator.yml");
    write_file(
        &config,
        b"class_count: 5\nvm_options:\n  Xss: 228K\n  Xmx: 512m\n",
    )?;

    let stdout = run_ok_with_env(
        &[
            "invocation",
            "--config",
            config.to_string_lossy().as_ref(),
            "--root",
            base.join("not-staged-yet").to_string_lossy().as_ref(),
            "--calculator",
            "/calc/bin/mc",
        ],
        &[(
            "MEMORY_CALCULATOR_CONFIG",
            "class_count: 7\nvm_options:\n  Xmx: 2g\n  XX:MaxRAMFraction=: 1.0\n",
        )],
    )?;

    assert_eq!(
        stdout.trim_end(),
        "/calc/bin/mc -totMemory=$MEMORY_LIMIT -stackThreads=250 -loadedClasses=7 -vmOptions=\"-Xss228K -Xmx2g -XX:MaxRAMFraction=1.0\""
    );

    let _ = std::fs::remove_dir_all(base);
    Ok(())
}

#[test]
fn config_file_env_is_used_without_config_flag() -> anyhow::Result<()> {
    let base = temp_dir("config_file_env");
    let config = base.join("from-env.yml");
    write_file(&config, b"class_count: 33\nstack_threads: 10\n")?;

    let stdout = run_ok_with_env(
        &[
            "invocation",
            "--root",
            base.join("not-staged-yet").to_string_lossy().as_ref(),
            "--calculator",
            "/calc/bin/mc",
        ],
        &[("MEMORY_CALCULATOR_CONFIG_FILE", config.to_string_lossy().as_ref())],
    )?;

    assert_eq!(
        stdout.trim_end(),
        "/calc/bin/mc -totMemory=$MEMORY_LIMIT -stackThreads=10 -loadedClasses=33"
    );

    let _ = std::fs::remove_dir_all(base);
    Ok(())
}

#[test]
fn absolute_calculator_under_relative_root_is_not_double_slashed() -> anyhow::Result<()> {
    let base = temp_dir("relative_root");
    let config = base.join("calculator.yml");
    write_file(&config, b"class_count: 1\n")?;

    let stdout = run_ok(&[
        "invocation",
        "--config",
        config.to_string_lossy().as_ref(),
        "--root",
        base.to_string_lossy().as_ref(),
        "--calculator",
        "/calc/bin/mc",
        "--relative-to",
        "droplet",
    ])?;

    assert!(stdout.starts_with("$PWD/../"), "{stdout}");
    assert!(!stdout.contains("$PWD//"), "{stdout}");

    let _ = std::fs::remove_dir_all(base);
    Ok(())
}

#[test]
fn corrupt_archive_fails_without_printing_a_count() -> anyhow::Result<()> {
    let base = temp_dir("corrupt");
    let app = base.join("app");
    write_file(&app.join("A.class"), b"")?;
    write_file(
        &app.join("app.war"),
        &jar_bytes(&[("WEB-INF/lib/broken.jar", b"not a zip")])?,
    )?;
    let config = base.join("calculator.yml");
    write_file(&config, b"")?;

    let out = run(&[
        "invocation",
        "--config",
        config.to_string_lossy().as_ref(),
        "--root",
        app.to_string_lossy().as_ref(),
        "--calculator",
        "/calc/bin/mc",
    ])?;

    assert!(!out.status.success());
    assert!(out.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("app.war!/WEB-INF/lib/broken.jar"), "{stderr}");

    let _ = std::fs::remove_dir_all(base);
    Ok(())
}

#[test]
fn invalid_config_is_rejected() -> anyhow::Result<()> {
    let base = temp_dir("invalid_config");
    let config = base.join("calculator.yml");
    write_file(&config, b"stack_threads: 0\n")?;

    let out = run(&[
        "invocation",
        "--config",
        config.to_string_lossy().as_ref(),
        "--root",
        base.to_string_lossy().as_ref(),
        "--calculator",
        "/calc/bin/mc",
    ])?;

    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("stack_threads"));

    let _ = std::fs::remove_dir_all(base);
    Ok(())
}

#[cfg(unix)]
#[test]
fn run_shows_calculator_settings() -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let base = temp_dir("run");
    let app = base.join("app");
    write_fixture_app(&app)?;
    let config = base.join("calculator.yml");
    write_file(&config, b"")?;
    let fake = base.join("bin/mc");
    write_file(&fake, b"#!/bin/sh\necho \"-Xmx1G $3\"\n")?;
    let mut perms = std::fs::metadata(&fake)?.permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&fake, perms)?;

    let stdout = run_ok(&[
        "run",
        "--config",
        config.to_string_lossy().as_ref(),
        "--root",
        app.to_string_lossy().as_ref(),
        "--calculator",
        fake.to_string_lossy().as_ref(),
    ])?;
    assert_eq!(stdout.trim(), "Memory Settings: -Xmx1G -loadedClasses=9");

    let _ = std::fs::remove_dir_all(base);
    Ok(())
}
