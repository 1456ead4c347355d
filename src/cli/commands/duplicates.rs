//! Duplicate scan and cleanup commands.

use std::path::{Path, PathBuf};
use tokio::runtime::Runtime;

use super::{CleanArgs, ScanArgs, drive_job, format_bytes, scan_cache_path, scan_root};
use crate::config::Config;
use crate::duplicates::DuplicateGroup;
use crate::jobs::{
    CancelToken, DeleteMode, DeleteReport, DuplicateDeleteJob, DuplicateScanJob,
    deletion_candidates,
};

/// Scan a directory and print the duplicate groups.
pub fn cmd_scan(
    rt: &Runtime,
    config: &mut Config,
    token: &CancelToken,
    args: &ScanArgs,
    json: bool,
) -> anyhow::Result<()> {
    let groups = rt.block_on(run_scan(config, token, args))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&groups)?);
    } else {
        print_groups(&groups);
    }
    Ok(())
}

/// Scan a directory, then delete every copy not marked to keep.
pub fn cmd_clean(
    rt: &Runtime,
    config: &mut Config,
    token: &CancelToken,
    args: &CleanArgs,
) -> anyhow::Result<()> {
    let mut groups = rt.block_on(run_scan(config, token, &args.scan))?;

    for path in apply_keep_overrides(&mut groups, &args.keep) {
        tracing::warn!(target: "cli::clean", path = %path.display(), "--keep path is not part of any duplicate group");
    }

    let candidates = deletion_candidates(&groups);
    if candidates.is_empty() {
        println!("No duplicates to remove.");
        return Ok(());
    }

    if args.dry_run {
        let reclaimable: u64 = groups.iter().map(DuplicateGroup::reclaimable_bytes).sum();
        println!("Would delete {} files ({}):", candidates.len(), format_bytes(reclaimable));
        for path in &candidates {
            println!("  {}", path.display());
        }
        return Ok(());
    }

    let mode = delete_mode(config, args.permanent);
    tracing::info!(
        target: "cli::clean",
        files = candidates.len(),
        mode = ?mode,
        "Deleting duplicates"
    );

    let job = DuplicateDeleteJob::new(candidates, mode).with_cache(scan_cache_path(config, &args.scan));
    let report = rt.block_on(async { drive_job(job.run(token.clone())).await })?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, mode);
    }

    if !report.failed.is_empty() {
        anyhow::bail!("{} files could not be deleted", report.failed.len());
    }
    Ok(())
}

/// Run the scan job; on success the root becomes `last_scan_path`.
async fn run_scan(
    config: &mut Config,
    token: &CancelToken,
    args: &ScanArgs,
) -> anyhow::Result<Vec<DuplicateGroup>> {
    let root = scan_root(config, args)?;
    if !root.is_dir() {
        anyhow::bail!("Not a directory: {}", root.display());
    }

    let match_artist = args.match_artist || config.duplicates.match_artist;
    tracing::info!(
        target: "cli::scan",
        path = %root.display(),
        match_artist,
        "Scanning for duplicates"
    );

    let job = DuplicateScanJob::new(&root)
        .match_artist(match_artist)
        .with_cache(scan_cache_path(config, args));
    let groups = drive_job(job.run(token.clone())).await?;

    config.library.last_scan_path = Some(resolved(&root));
    Ok(groups)
}

/// Mark every file named in `keep` as kept.
///
/// Returns the `keep` paths that matched no file in any group.
fn apply_keep_overrides(groups: &mut [DuplicateGroup], keep: &[PathBuf]) -> Vec<PathBuf> {
    if keep.is_empty() {
        return Vec::new();
    }

    let wanted: Vec<PathBuf> = keep.iter().map(|p| resolved(p)).collect();
    let mut matched = vec![false; keep.len()];
    for file in groups.iter_mut().flat_map(|g| g.files.iter_mut()) {
        let path = resolved(&file.path);
        for (i, want) in wanted.iter().enumerate() {
            if *want == path {
                file.keep = true;
                matched[i] = true;
            }
        }
    }

    keep.iter()
        .zip(matched)
        .filter(|(_, found)| !found)
        .map(|(path, _)| path.clone())
        .collect()
}

fn resolved(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn delete_mode(config: &Config, permanent: bool) -> DeleteMode {
    if permanent || !config.duplicates.use_trash {
        DeleteMode::Permanent
    } else {
        DeleteMode::Trash
    }
}

fn print_groups(groups: &[DuplicateGroup]) {
    if groups.is_empty() {
        println!("No duplicates found.");
        return;
    }

    for group in groups {
        println!("\n{} ({} copies)", group.normalized_key, group.files.len());
        for file in &group.files {
            let marker = if file.keep { "KEEP  " } else { "delete" };
            let bitrate = if file.tags.bitrate > 0 {
                format!("{} kbps", file.tags.bitrate / 1000)
            } else {
                "? kbps".to_string()
            };
            println!(
                "  [{marker}] {} ({}, {bitrate}, {})",
                file.path.display(),
                display_extension(&file.extension),
                format_bytes(file.size)
            );
        }
    }

    let files: usize = groups.iter().map(|g| g.deletable_files().len()).sum();
    let bytes: u64 = groups.iter().map(DuplicateGroup::reclaimable_bytes).sum();
    println!(
        "\n{} groups, {files} redundant files, {} reclaimable",
        groups.len(),
        format_bytes(bytes)
    );
}

fn print_report(report: &DeleteReport, mode: DeleteMode) {
    let verb = match mode {
        DeleteMode::Trash => "Moved to trash",
        DeleteMode::Permanent => "Deleted",
    };
    println!("{verb}: {} files", report.deleted.len());
    for (path, reason) in &report.failed {
        println!("  failed: {} ({reason})", path.display());
    }
}

fn display_extension(extension: &str) -> String {
    match extension.strip_prefix('.') {
        Some(ext) => ext.to_uppercase(),
        None => "no extension".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duplicates::{FileRecord, find_duplicates};
    use crate::scanner::AudioFile;
    use crate::tag_cache::{CacheEntry, TagCache};
    use crate::test_utils::{titled, write_dummy_file};
    use tempfile::TempDir;

    /// A library with `song.mp3` and `song.flac` sharing a title.
    ///
    /// The files are not decodable, so their tags are seeded into a cache.
    struct Library {
        _dir: TempDir,
        music: PathBuf,
        db: PathBuf,
        mp3: PathBuf,
        flac: PathBuf,
    }

    fn seeded_library(rt: &Runtime) -> Library {
        let dir = tempfile::tempdir().unwrap();
        let music = dir.path().join("music");
        std::fs::create_dir(&music).unwrap();
        let mp3 = music.join("song.mp3");
        let flac = music.join("song.flac");
        write_dummy_file(&mp3, 300);
        write_dummy_file(&flac, 900);

        let db = dir.path().join("cache.db");
        rt.block_on(async {
            let cache = TagCache::open(&db).await.unwrap();
            let entries: Vec<CacheEntry> = [&mp3, &flac]
                .into_iter()
                .map(|p| {
                    let file = AudioFile::from_path(p).unwrap();
                    CacheEntry {
                        path: file.path,
                        mtime_ns: file.mtime_ns,
                        size: file.size,
                        tags: titled("Same Song"),
                    }
                })
                .collect();
            cache.put_many(&entries).await.unwrap();
            cache.close().await;
        });

        Library {
            _dir: dir,
            music,
            db,
            mp3,
            flac,
        }
    }

    fn clean_args(lib: &Library) -> CleanArgs {
        CleanArgs {
            scan: ScanArgs {
                path: Some(lib.music.clone()),
                match_artist: false,
                no_cache: false,
                cache_db: Some(lib.db.clone()),
            },
            dry_run: false,
            permanent: true,
            json: false,
            keep: Vec::new(),
        }
    }

    #[test]
    fn test_clean_deletes_lower_quality_copy() {
        let rt = Runtime::new().unwrap();
        let lib = seeded_library(&rt);
        let mut config = Config::default();

        cmd_clean(&rt, &mut config, &CancelToken::new(), &clean_args(&lib)).unwrap();

        assert!(!lib.mp3.exists());
        assert!(lib.flac.exists());
        assert_eq!(config.library.last_scan_path, Some(resolved(&lib.music)));
    }

    #[test]
    fn test_clean_dry_run_touches_nothing() {
        let rt = Runtime::new().unwrap();
        let lib = seeded_library(&rt);
        let args = CleanArgs {
            dry_run: true,
            ..clean_args(&lib)
        };

        cmd_clean(&rt, &mut Config::default(), &CancelToken::new(), &args).unwrap();

        assert!(lib.mp3.exists());
        assert!(lib.flac.exists());
    }

    #[test]
    fn test_clean_honours_keep_override() {
        let rt = Runtime::new().unwrap();
        let lib = seeded_library(&rt);
        let args = CleanArgs {
            keep: vec![lib.mp3.clone()],
            ..clean_args(&lib)
        };

        cmd_clean(&rt, &mut Config::default(), &CancelToken::new(), &args).unwrap();

        assert!(lib.mp3.exists());
        assert!(lib.flac.exists());
    }

    #[test]
    fn test_clean_with_cancelled_token_deletes_nothing() {
        let rt = Runtime::new().unwrap();
        let lib = seeded_library(&rt);
        let token = CancelToken::new();
        token.cancel();
        let mut config = Config::default();

        let err = cmd_clean(&rt, &mut config, &token, &clean_args(&lib)).unwrap_err();

        assert_eq!(err.to_string(), "Cancelled");
        assert!(lib.mp3.exists());
        assert!(config.library.last_scan_path.is_none());
    }

    #[test]
    fn test_scan_defaults_to_last_scanned_directory() {
        let rt = Runtime::new().unwrap();
        let lib = seeded_library(&rt);
        let mut config = Config::default();
        config.library.last_scan_path = Some(lib.music.clone());
        let args = ScanArgs {
            path: None,
            ..clean_args(&lib).scan
        };

        cmd_scan(&rt, &mut config, &CancelToken::new(), &args, true).unwrap();

        assert_eq!(config.library.last_scan_path, Some(resolved(&lib.music)));
    }

    #[test]
    fn test_keep_overrides_report_unmatched_paths() {
        let mut groups = find_duplicates(
            vec![
                FileRecord::new("a.mp3", titled("Song"), 1),
                FileRecord::new("b.flac", titled("Song"), 1),
            ],
            false,
        );

        let unmatched = apply_keep_overrides(
            &mut groups,
            &[PathBuf::from("a.mp3"), PathBuf::from("elsewhere.mp3")],
        );

        assert_eq!(unmatched, vec![PathBuf::from("elsewhere.mp3")]);
        assert!(groups[0].files.iter().all(|f| f.keep));
        assert!(deletion_candidates(&groups).is_empty());
    }

    #[test]
    fn test_delete_mode_honours_flag_and_config() {
        let mut config = Config::default();
        assert_eq!(delete_mode(&config, false), DeleteMode::Trash);
        assert_eq!(delete_mode(&config, true), DeleteMode::Permanent);

        config.duplicates.use_trash = false;
        assert_eq!(delete_mode(&config, false), DeleteMode::Permanent);
    }

    #[test]
    fn test_display_extension() {
        assert_eq!(display_extension(".flac"), "FLAC");
        assert_eq!(display_extension(""), "no extension");
    }

    #[tokio::test]
    async fn test_run_scan_rejects_missing_directory() {
        let args = ScanArgs {
            path: Some(PathBuf::from("/definitely/not/here")),
            match_artist: false,
            no_cache: true,
            cache_db: None,
        };
        let err = run_scan(&mut Config::default(), &CancelToken::new(), &args)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Not a directory"));
    }
}
