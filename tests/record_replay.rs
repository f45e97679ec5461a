//! Cassette replay integration tests, with zero network I/O.
//!
//! Every test sets `IMAGEN_BOT_REPLAY` to a cassette under `test_fixtures/`
//! and runs in its own scratch directory, so state snapshots and media never
//! touch the repository.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_fixtures")
}

fn config_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config")
}

/// Fresh scratch directory with a config file holding `bot_section`.
fn workspace(name: &str, bot_section: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("imagen_bot_it_{name}"));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("config.toml"), format!("[bot]\nseed = 1\n{bot_section}\n")).unwrap();
    dir
}

fn replay(work: &Path, cassette: &str) -> Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("imagen-bot");
    cmd.current_dir(work)
        .env("IMAGEN_BOT_REPLAY", fixtures_dir().join(cassette))
        .env_remove("IMAGEN_BOT_REC")
        .env_remove("GEMINI_API_KEY")
        .env_remove("IMAGEN_BOT_LOG")
        .arg("--config")
        .arg(work.join("config.toml"))
        .arg("--styles")
        .arg(config_dir().join("styles.yaml"))
        .arg("--prompts")
        .arg(config_dir().join("prompts.yaml"));
    cmd
}

fn json_lines(stdout: &[u8]) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(|l| serde_json::from_str(l).unwrap_or_else(|e| panic!("not JSON: {l}: {e}")))
        .collect()
}

fn ops<'a>(lines: &'a [serde_json::Value], op: &str) -> Vec<&'a serde_json::Value> {
    lines.iter().filter(|l| l["op"] == op).collect()
}

#[test]
fn generate_saves_image_to_explicit_path() {
    let work = workspace("generate_explicit", "");
    let out = work.join("cat.png");

    replay(&work, "generate_cat.cassette.yaml")
        .args(["generate", "!a cat -t1 -s2", "--output"])
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("Here is your cat."))
        .stdout(predicate::str::contains("! a cat -t1 -s2"))
        .stderr(predicate::str::contains("Saved:"));

    let bytes = std::fs::read(&out).unwrap();
    assert!(bytes.starts_with(b"\x89PNG"));
}

#[test]
fn generate_converts_to_requested_format() {
    let work = workspace("generate_convert", "");
    let out = work.join("cat.jpg");

    replay(&work, "generate_cat.cassette.yaml")
        .args(["generate", "!a cat -t1 -s2", "-o"])
        .arg(&out)
        .assert()
        .success();

    let bytes = std::fs::read(&out).unwrap();
    assert!(bytes.starts_with(&[0xFF, 0xD8]), "expected a JPEG");
}

#[test]
fn generate_auto_filename_is_kebab_case() {
    let work = workspace("generate_auto", "");

    replay(&work, "generate_cat.cassette.yaml")
        .args(["generate", "!A Cat -t1 -s2"])
        .assert()
        .success();

    let names: Vec<String> = std::fs::read_dir(&work)
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".png"))
        .collect();
    assert_eq!(names.len(), 1, "{names:?}");
    assert!(names[0].starts_with("a-cat-"), "{}", names[0]);
}

#[test]
fn safety_block_is_reported() {
    let work = workspace("blocked", "");

    replay(&work, "blocked.cassette.yaml")
        .args(["generate", "something forbidden"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error: Blocked by safety policy: HARM_CATEGORY_DANGEROUS_CONTENT"));
}

#[test]
fn exhausted_cassette_is_an_error_not_a_panic() {
    let work = workspace("exhausted", "");
    std::fs::write(
        work.join("empty.cassette.yaml"),
        "name: empty\nrecorded_at: 2026-01-01T00:00:00Z\ncommit: x\ninteractions: []\n",
    )
    .unwrap();

    let mut cmd = replay(&work, "generate_cat.cassette.yaml");
    cmd.env("IMAGEN_BOT_REPLAY", work.join("empty.cassette.yaml"))
        .args(["generate", "a cat"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no interactions"));
}

#[test]
fn chat_session_generates_edits_and_answers() {
    let work = workspace("chat_session", "");
    let input = "\
!a cat -t1 -s2 --ar 16:9
:press 2 settings
:press 2 style_set|1
:press 2 apply
what is bokeh?
/suffix set watercolor
";

    let output = replay(&work, "chat_session.cassette.yaml")
        .args(["chat", "--chat-id", "1", "--user-id", "7"])
        .write_stdin(input)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let lines = json_lines(&output);

    let photos = ops(&lines, "send_photo");
    assert_eq!(photos.len(), 2, "{lines:#?}");
    let first = photos[0];
    assert_eq!(first["message_id"], 2);
    let caption = first["caption"].as_str().unwrap();
    assert!(caption.contains("Here is your cat."));
    assert!(caption.contains("Type: [1] Photo"));
    assert!(caption.contains("Style: [2] Bokeh"));
    assert!(caption.contains("! a cat -t1 -s2 --ar 16:9"));

    let edits = ops(&lines, "edit_caption");
    assert!(edits.iter().any(|e| e["caption"].as_str().unwrap().contains("Style: [1] Noir")));

    let applied = photos[1];
    assert_eq!(applied["reply_to"], 2);
    assert!(applied["caption"].as_str().unwrap().contains("Switched to a film noir look."));

    let notices: Vec<&str> = ops(&lines, "notice").iter().map(|n| n["text"].as_str().unwrap()).collect();
    assert!(notices.contains(&"⏳ Applying changes..."));

    let texts = ops(&lines, "edit_text");
    assert_eq!(
        texts.last().unwrap()["text"],
        "Bokeh is the soft blur of out-of-focus light."
    );
    let sent: Vec<&str> = ops(&lines, "send_text").iter().map(|t| t["text"].as_str().unwrap()).collect();
    assert!(sent.contains(&"Suffix set: watercolor"));

    assert!(work.join(".imagen-bot/state.json").exists());
    let chats = std::fs::read_to_string(work.join(".imagen-bot/chats.json")).unwrap();
    assert!(chats.contains("watercolor"));
}

#[test]
fn album_of_two_is_combined_at_end_of_input() {
    let work = workspace("album", "media_group_window_ms = 50");
    let png = std::fs::read(fixtures_dir().join("pixel.png")).unwrap();
    std::fs::write(work.join("a.png"), &png).unwrap();
    std::fs::write(work.join("b.png"), &png).unwrap();

    let output = replay(&work, "album.cassette.yaml")
        .args(["chat", "--chat-id", "-100"])
        .write_stdin(":group g1 a.png put them side by side\n:group g1 b.png\n")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let lines = json_lines(&output);

    let photos = ops(&lines, "send_photo");
    assert_eq!(photos.len(), 1, "{lines:#?}");
    assert_eq!(photos[0]["reply_to"], 1);
    assert_eq!(photos[0]["chat_id"], -100);
}

#[test]
fn malformed_lines_are_skipped() {
    let work = workspace("malformed", "");

    replay(&work, "generate_cat.cassette.yaml")
        .args(["chat"])
        .write_stdin(":dance\n:press x y\n/help\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Image generation:"))
        .stderr(predicate::str::contains("input line ignored"));
}
