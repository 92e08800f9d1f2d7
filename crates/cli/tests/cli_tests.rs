use anyhow::Result;
use std::process::Command;
use tempfile::tempdir;

fn strides() -> Command {
    Command::new(env!("CARGO_BIN_EXE_strides"))
}

#[test]
fn run_prints_original_and_recovered_arrays() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("strides.asdf");

    let output = strides().args(["run", "--output"]).arg(&path).output()?;
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8(output.stdout)?;
    let expected = "[[11, 12, 13],\n [21, 22, 23]]";
    assert_eq!(
        stdout,
        format!("Original array:\n {0}\nRecovered array:\n {0}\n", expected)
    );
    assert!(path.is_file());
    Ok(())
}

#[test]
fn inspect_reports_fortran_strides() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("strides.asdf");
    assert!(strides().args(["run", "--output"]).arg(&path).status()?.success());

    let output = strides().arg("inspect").arg(&path).output()?;
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout)?;
    assert!(
        stdout.contains("array: ndarray int64 [2, 3] order=F strides=[8, 16]"),
        "{}",
        stdout
    );
    assert!(stdout.contains("block 0:"));
    Ok(())
}

#[test]
fn npz_and_inline_variants_succeed() -> Result<()> {
    let dir = tempdir()?;
    let npz = dir.path().join("strides.npz");
    assert!(strides()
        .args(["run", "--format", "npz", "--output"])
        .arg(&npz)
        .status()?
        .success());

    let inline = dir.path().join("inline.asdf");
    let output = strides()
        .args(["run", "--inline", "--order", "C", "--metrics", "--output"])
        .arg(&inline)
        .output()?;
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.contains("Average Write Time"), "{}", stdout);
    assert!(stdout.contains("Average Read Time"), "{}", stdout);
    Ok(())
}

#[test]
fn bad_input_fails_with_nonzero_status() -> Result<()> {
    let dir = tempdir()?;
    let bogus = dir.path().join("bogus.asdf");
    std::fs::write(&bogus, b"not an asdf file")?;

    assert!(!strides().arg("inspect").arg(&bogus).status()?.success());
    assert!(!strides().args(["run", "--format", "hdf5"]).status()?.success());
    Ok(())
}
