//! Subcommand bodies
//!
//! Listing commands print one tab-separated row per resource so the output
//! pipes cleanly into `cut` and friends.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dotloop_auth::{TokenManager, now_millis};
use dotloop_client::{DotloopApi, Download, LoopQuery};
use tracing::info;

pub async fn status(
    manager: &TokenManager,
    credentials_path: &Path,
    out: &mut impl Write,
) -> Result<()> {
    writeln!(out, "credentials: {}", credentials_path.display())?;
    let Some(record) = manager.credentials().await else {
        writeln!(out, "signed in: no")?;
        return Ok(());
    };

    writeln!(out, "signed in: yes")?;
    let now = now_millis();
    let access = match record.expires_at {
        Some(expires_at) if record.is_valid_at(now) => {
            format!("valid, expires in {}", format_remaining(expires_at - now))
        }
        Some(_) => "expired".to_string(),
        None => "no expiry recorded".to_string(),
    };
    writeln!(out, "access token: {access}")?;
    let refresh = if record.has_refresh_token() {
        "present"
    } else {
        "absent"
    };
    writeln!(out, "refresh token: {refresh}")?;
    Ok(())
}

pub async fn profiles(api: &DotloopApi, out: &mut impl Write) -> Result<()> {
    for profile in api.profiles().await? {
        writeln!(
            out,
            "{}\t{}\t{}{}",
            profile.id,
            profile.name,
            profile.profile_type.as_deref().unwrap_or("-"),
            if profile.default { "\tdefault" } else { "" }
        )?;
    }
    Ok(())
}

pub async fn loops(
    api: &DotloopApi,
    profile_id: &str,
    query: &LoopQuery,
    out: &mut impl Write,
) -> Result<()> {
    for item in api.loops(profile_id, query).await? {
        writeln!(
            out,
            "{}\t{}\t{}\t{}",
            item.id,
            item.name,
            item.status.as_deref().unwrap_or("-"),
            item.updated.as_deref().unwrap_or("-")
        )?;
    }
    Ok(())
}

pub async fn folders(
    api: &DotloopApi,
    profile_id: &str,
    loop_id: &str,
    out: &mut impl Write,
) -> Result<()> {
    for folder in api.folders(profile_id, loop_id, true).await? {
        writeln!(
            out,
            "{}\t{}\t{} documents",
            folder.id,
            folder.name,
            folder.documents.len()
        )?;
    }
    Ok(())
}

pub async fn documents(
    api: &DotloopApi,
    profile_id: &str,
    loop_id: &str,
    folder_id: &str,
    out: &mut impl Write,
) -> Result<()> {
    for document in api.documents(profile_id, loop_id, folder_id).await? {
        writeln!(
            out,
            "{}\t{}\t{}",
            document.id,
            document.name,
            document.updated.as_deref().unwrap_or("-")
        )?;
    }
    Ok(())
}

/// Download a document and write it to disk. Returns the path written.
pub async fn download(
    api: &DotloopApi,
    ids: [&str; 4],
    out: Option<&Path>,
) -> Result<PathBuf> {
    let [profile_id, loop_id, folder_id, document_id] = ids;
    let file = api
        .download_document(profile_id, loop_id, folder_id, document_id)
        .await?;
    let target = download_target(&file, document_id, out);

    tokio::fs::write(&target, &file.bytes)
        .await
        .with_context(|| format!("failed to write {}", target.display()))?;
    info!(
        path = %target.display(),
        bytes = file.bytes.len(),
        content_type = ?file.content_type,
        "document saved"
    );
    Ok(target)
}

/// `out` as given, or inside it when it is a directory, named after the
/// server-supplied file name or the document id.
fn download_target(file: &Download, document_id: &str, out: Option<&Path>) -> PathBuf {
    let name = file
        .file_name
        .as_deref()
        .and_then(|n| Path::new(n).file_name())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(format!("document-{document_id}.pdf")));
    match out {
        Some(dir) if dir.is_dir() => dir.join(name),
        Some(path) => path.to_path_buf(),
        None => name,
    }
}

fn format_remaining(ms: u64) -> String {
    let secs = ms / 1000;
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}
