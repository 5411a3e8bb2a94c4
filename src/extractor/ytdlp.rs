use std::{
    collections::BTreeMap,
    io::ErrorKind,
    path::{Path, PathBuf},
    process::{Output, Stdio},
    time::Duration,
};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::{process::Command, time::timeout};
use tracing::{debug, info, warn};
use url::Url;

use super::{ExtractOptions, Extraction, Extractor};
use crate::{config::Config, dispatch::content_type_for_filename, error::ExtractionError};

const FORMAT_SELECTOR: &str = "best[ext=mp4]/best";
const BOT_BLOCK_RETRY_DELAY: Duration = Duration::from_secs(2);

// Browser-like headers for non-YouTube sources. YouTube gets yt-dlp's own
// defaults, a desktop UA from a server IP trips its bot detection.
const BROWSER_HEADERS: [(&str, &str); 3] = [
    (
        "User-Agent",
        concat!(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 ",
            "(KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
        ),
    ),
    (
        "Accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
    ),
    ("Accept-Language", "en-us,en;q=0.9"),
];

const YOUTUBE_DOMAINS: [&str; 2] = ["youtube.com", "youtu.be"];

// Local tool problems that would otherwise match the "not found" markers.
const TOOL_MARKERS: [&str; 3] = ["postprocessing", "ffmpeg", "ffprobe"];

const NOT_FOUND_MARKERS: [&str; 8] = [
    "unsupported url",
    "http error 404",
    "not found",
    "does not exist",
    "video unavailable",
    "no video",
    "has been removed",
    "no longer available",
];

const BLOCKED_MARKERS: [&str; 13] = [
    "sign in",
    "log in",
    "login",
    "cookies",
    "not a bot",
    "bot detection",
    "rate-limit",
    "rate limit",
    "http error 403",
    "http error 429",
    "private",
    "not available",
    "age-restricted",
];

const TRANSIENT_MARKERS: [&str; 9] = [
    "timed out",
    "timeout",
    "connection",
    "temporary failure",
    "network is unreachable",
    "name or service not known",
    "getaddrinfo",
    "unable to download webpage",
    "http error 5",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Vanilla,
    PoToken,
}

#[derive(Debug, Deserialize)]
struct YtDlpVideoInfo {
    id: Option<String>,
    title: Option<String>,
    ext: Option<String>,
    url: Option<String>,
    protocol: Option<String>,
    #[serde(default)]
    http_headers: BTreeMap<String, String>,
    cookies: Option<String>,
    requested_formats: Option<Vec<serde_json::Value>>,
}

/// Runs the `yt-dlp` binary. Each invocation is bounded by `timeout` and
/// the child is killed if the future is dropped.
#[derive(Debug, Clone)]
pub struct YtDlp {
    binary: String,
    timeout: Duration,
    pot_provider_url: Option<String>,
    prefer_direct: bool,
    max_download_bytes: u64,
}

impl YtDlp {
    pub fn from_config(config: &Config) -> Self {
        Self {
            binary: config.yt_dlp_bin.clone(),
            timeout: config.yt_dlp_timeout,
            pot_provider_url: config.pot_provider_url.clone(),
            prefer_direct: config.prefer_direct,
            max_download_bytes: config.max_download_bytes,
        }
    }

    fn attempts(&self, is_youtube: bool) -> Vec<Attempt> {
        let mut attempts = vec![Attempt::Vanilla];
        if is_youtube && self.pot_provider_url.is_some() {
            attempts.push(Attempt::PoToken);
        }
        attempts
    }

    fn base_args(
        &self,
        is_youtube: bool,
        attempt: Attempt,
        options: &ExtractOptions,
    ) -> Vec<String> {
        let mut args = vec![
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--socket-timeout".to_string(),
            self.timeout.as_secs().to_string(),
            "-f".to_string(),
            FORMAT_SELECTOR.to_string(),
        ];

        if !is_youtube {
            for (name, value) in BROWSER_HEADERS {
                args.push("--add-header".to_string());
                args.push(format!("{name}:{value}"));
            }
        }

        if attempt == Attempt::PoToken
            && let Some(provider) = self.pot_provider_url.as_deref()
        {
            args.push("--extractor-args".to_string());
            args.push(format!("youtubepot-bgutilhttp:base_url={provider}"));
        }

        if let Some(cookies) = options.cookies_file.as_deref() {
            args.push("--cookies".to_string());
            args.push(cookies.to_string_lossy().into_owned());
        }

        args
    }

    async fn fetch_metadata(
        &self,
        url: &str,
        is_youtube: bool,
        options: &ExtractOptions,
    ) -> Result<(YtDlpVideoInfo, Attempt), ExtractionError> {
        let attempts = self.attempts(is_youtube);

        for (index, attempt) in attempts.iter().copied().enumerate() {
            let mut args = self.base_args(is_youtube, attempt, options);
            args.push("-J".to_string());
            args.push(url.to_string());

            info!(
                "Extraction attempt {}/{} for {url} ({attempt:?})",
                index + 1,
                attempts.len()
            );
            match self.run(args).await {
                Ok(output) => {
                    let info = serde_json::from_slice::<YtDlpVideoInfo>(&output.stdout)
                        .map_err(|error| {
                            ExtractionError::Internal(format!(
                                "Could not read metadata returned by yt-dlp: {error}"
                            ))
                        })?;
                    return Ok((info, attempt));
                }
                Err(ExtractionError::Blocked(message)) if index + 1 < attempts.len() => {
                    warn!("Attempt {} for {url} was blocked: {message}", index + 1);
                    tokio::time::sleep(BOT_BLOCK_RETRY_DELAY).await;
                }
                Err(error) => return Err(error),
            }
        }

        Err(ExtractionError::Internal("No video found.".to_string()))
    }

    async fn download(
        &self,
        url: &str,
        is_youtube: bool,
        attempt: Attempt,
        options: &ExtractOptions,
        title: &str,
    ) -> Result<Extraction, ExtractionError> {
        let template = options.job_dir.join("%(id)s.%(ext)s");
        let mut args = self.base_args(is_youtube, attempt, options);
        args.extend([
            "--newline".to_string(),
            "--print".to_string(),
            "after_move:filepath".to_string(),
            "-o".to_string(),
            template.to_string_lossy().into_owned(),
            url.to_string(),
        ]);

        let output = self.run(args).await?;
        let printed_path = extract_printed_path(&output.stdout);
        let path = resolve_downloaded_file(&options.job_dir, printed_path.as_deref()).await?;

        let size = tokio::fs::metadata(&path)
            .await
            .map_err(|error| {
                ExtractionError::Internal(format!("Could not read downloaded file: {error}"))
            })?
            .len();
        if size > self.max_download_bytes {
            let max_mb = self.max_download_bytes / 1_048_576;
            return Err(ExtractionError::Internal(format!(
                "The video exceeds the {max_mb} MB download limit."
            )));
        }

        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("mp4");
        let filename = format!("{title}.{ext}");
        debug!("Downloaded {url} to {:?} ({size} bytes)", path);

        Ok(Extraction::LocalFile {
            content_type: content_type_for_filename(&filename),
            path,
            filename,
        })
    }

    async fn run(&self, args: Vec<String>) -> Result<Output, ExtractionError> {
        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = timeout(self.timeout, command.output())
            .await
            .map_err(|_| {
                ExtractionError::Transient(format!(
                    "Extraction timed out after {} seconds.",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|error| {
                if error.kind() == ErrorKind::NotFound {
                    ExtractionError::Internal(format!(
                        "{} is not installed. Install yt-dlp and restart the service.",
                        self.binary
                    ))
                } else {
                    ExtractionError::Internal(format!("Could not run {}: {error}", self.binary))
                }
            })?;

        if !output.status.success() {
            let error = classify_failure(&output.stderr);
            warn!("yt-dlp exited with {}: {error:?}", output.status);
            return Err(error);
        }

        Ok(output)
    }
}

#[async_trait]
impl Extractor for YtDlp {
    async fn resolve(
        &self,
        url: &str,
        options: &ExtractOptions,
    ) -> Result<Extraction, ExtractionError> {
        let is_youtube = is_youtube_url(url);
        let (info, attempt) = self.fetch_metadata(url, is_youtube, options).await?;
        let title = sanitize_title(info.title.as_deref());

        if self.prefer_direct
            && let Some((media_url, headers)) = direct_media(&info)
        {
            let ext = info.ext.as_deref().unwrap_or("mp4");
            debug!(
                "Resolved {url} to a direct link for {:?}",
                info.id.as_deref().unwrap_or("unknown")
            );
            return Ok(Extraction::Direct {
                url: media_url,
                headers,
                filename: format!("{title}.{ext}"),
            });
        }

        self.download(url, is_youtube, attempt, options, &title).await
    }
}

/// A format is hotlinkable when it is a single progressive http(s) file
/// that needs no cookies, either as a header or in yt-dlp's `cookies` field.
fn direct_media(info: &YtDlpVideoInfo) -> Option<(String, Vec<(String, String)>)> {
    if info.requested_formats.is_some() {
        return None;
    }

    let url = info.url.as_deref()?;
    if !matches!(info.protocol.as_deref(), Some("http" | "https")) {
        return None;
    }

    if info
        .cookies
        .as_deref()
        .is_some_and(|cookies| !cookies.trim().is_empty())
    {
        return None;
    }

    if info
        .http_headers
        .keys()
        .any(|name| name.eq_ignore_ascii_case("cookie"))
    {
        return None;
    }

    let headers = info
        .http_headers
        .iter()
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    Some((url.to_string(), headers))
}

pub fn classify_failure(stderr: &[u8]) -> ExtractionError {
    let line = String::from_utf8_lossy(stderr)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("yt-dlp could not complete the request.")
        .to_string();
    let message = line
        .strip_prefix("ERROR:")
        .map(str::trim)
        .unwrap_or(&line)
        .to_string();
    let lower = message.to_ascii_lowercase();

    if contains_any(&lower, &TOOL_MARKERS) {
        ExtractionError::Internal(message)
    } else if contains_any(&lower, &NOT_FOUND_MARKERS) {
        ExtractionError::NotFound(message)
    } else if contains_any(&lower, &BLOCKED_MARKERS) {
        ExtractionError::Blocked(message)
    } else if contains_any(&lower, &TRANSIENT_MARKERS) {
        ExtractionError::Transient(message)
    } else {
        ExtractionError::Internal(message)
    }
}

fn contains_any(haystack: &str, markers: &[&str]) -> bool {
    markers.iter().any(|marker| haystack.contains(marker))
}

fn is_youtube_url(input: &str) -> bool {
    Url::parse(input)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_ascii_lowercase))
        .is_some_and(|host| {
            YOUTUBE_DOMAINS
                .iter()
                .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")))
        })
}

fn sanitize_title(title: Option<&str>) -> String {
    let cleaned = title
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || matches!(c, '_' | '-' | '.'))
        .take(80)
        .collect::<String>();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        "video".to_string()
    } else {
        trimmed.to_string()
    }
}

fn extract_printed_path(stdout: &[u8]) -> Option<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .map(ToString::to_string)
}

async fn resolve_downloaded_file(
    job_dir: &Path,
    printed_path: Option<&str>,
) -> Result<PathBuf, ExtractionError> {
    let canonical_job_dir = tokio::fs::canonicalize(job_dir).await.map_err(|error| {
        ExtractionError::Internal(format!("Could not resolve job directory: {error}"))
    })?;

    if let Some(path_value) = printed_path {
        for candidate in [PathBuf::from(path_value), job_dir.join(path_value)] {
            if let Some(path) = resolve_download_candidate(&canonical_job_dir, &candidate).await? {
                return Ok(path);
            }
        }
    }

    let mut entries = tokio::fs::read_dir(job_dir).await.map_err(|error| {
        ExtractionError::Internal(format!("Could not open job directory: {error}"))
    })?;

    while let Some(entry) = entries.next_entry().await.map_err(|error| {
        ExtractionError::Internal(format!("Could not list job directory: {error}"))
    })? {
        let path = entry.path();
        let is_partial = path
            .extension()
            .is_some_and(|ext| ext == "part" || ext == "ytdl");
        if is_partial {
            continue;
        }
        if let Some(path) = resolve_download_candidate(&canonical_job_dir, &path).await? {
            return Ok(path);
        }
    }

    Err(ExtractionError::Internal(
        "File not found after download.".to_string(),
    ))
}

async fn resolve_download_candidate(
    canonical_job_dir: &Path,
    candidate: &Path,
) -> Result<Option<PathBuf>, ExtractionError> {
    let metadata = match tokio::fs::metadata(candidate).await {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(ExtractionError::Internal(format!(
                "Could not inspect downloaded file: {error}"
            )));
        }
    };

    if !metadata.is_file() {
        return Ok(None);
    }

    let canonical = tokio::fs::canonicalize(candidate).await.map_err(|error| {
        ExtractionError::Internal(format!("Could not resolve downloaded file: {error}"))
    })?;

    if !canonical.starts_with(canonical_job_dir) {
        warn!("Ignoring file outside the job directory: {:?}", canonical);
        return Ok(None);
    }

    Ok(Some(canonical))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{JobDir, eventually};

    fn ytdlp() -> YtDlp {
        YtDlp {
            binary: "yt-dlp".to_string(),
            timeout: Duration::from_secs(60),
            pot_provider_url: None,
            prefer_direct: true,
            max_download_bytes: 1024,
        }
    }

    fn options(job_dir: &Path) -> ExtractOptions {
        ExtractOptions {
            cookies_file: None,
            job_dir: job_dir.to_path_buf(),
        }
    }

    fn info(json: serde_json::Value) -> YtDlpVideoInfo {
        serde_json::from_value(json).expect("valid info")
    }

    #[test]
    fn classifies_stderr_by_last_line() {
        let cases = [
            ("ERROR: Unsupported URL: https://x.com/home", "not_found"),
            ("ERROR: [twitter] 123: HTTP Error 404: Not Found", "not_found"),
            (
                "ERROR: [youtube] abc: Sign in to confirm you're not a bot. Use --cookies",
                "blocked",
            ),
            (
                "ERROR: [instagram] xyz: Requested content is not available, \
                 rate-limit reached or login required",
                "blocked",
            ),
            ("ERROR: [tiktok] 1: HTTP Error 429: Too Many Requests", "blocked"),
            ("ERROR: Unable to download webpage: The read operation timed out", "transient"),
            ("ERROR: [twitter] 9: HTTP Error 503: Service Unavailable", "transient"),
            ("ERROR: Postprocessing: ffprobe not found", "internal"),
            ("ERROR: something exploded", "internal"),
            ("", "internal"),
        ];

        for (stderr, expected) in cases {
            let kind = match classify_failure(format!("WARNING: noise\n{stderr}\n").as_bytes()) {
                ExtractionError::NotFound(_) => "not_found",
                ExtractionError::Blocked(_) => "blocked",
                ExtractionError::Transient(_) => "transient",
                ExtractionError::Internal(_) => "internal",
            };
            assert_eq!(kind, expected, "stderr: {stderr}");
        }
    }

    #[test]
    fn classified_message_drops_error_prefix() {
        let error = classify_failure(b"ERROR: something exploded\n");
        assert_eq!(error, ExtractionError::Internal("something exploded".to_string()));
    }

    #[test]
    fn progressive_https_format_is_direct() {
        let info = info(serde_json::json!({
            "id": "123",
            "title": "clip",
            "ext": "mp4",
            "url": "https://video.twimg.com/clip.mp4",
            "protocol": "https",
            "http_headers": {"User-Agent": "ua", "Accept": "*/*"}
        }));

        let (url, headers) = direct_media(&info).expect("direct");
        assert_eq!(url, "https://video.twimg.com/clip.mp4");
        assert_eq!(
            headers,
            vec![
                ("Accept".to_string(), "*/*".to_string()),
                ("User-Agent".to_string(), "ua".to_string())
            ]
        );
    }

    #[test]
    fn streaming_merged_or_cookie_formats_need_download() {
        let hls = info(serde_json::json!({
            "url": "https://cdn.example/master.m3u8",
            "protocol": "m3u8_native"
        }));
        assert!(direct_media(&hls).is_none());

        let merged = info(serde_json::json!({
            "protocol": "https+https",
            "requested_formats": [{}, {}]
        }));
        assert!(direct_media(&merged).is_none());

        let with_cookie = info(serde_json::json!({
            "url": "https://cdn.example/v.mp4",
            "protocol": "https",
            "http_headers": {"Cookie": "session=1"}
        }));
        assert!(direct_media(&with_cookie).is_none());

        let with_cookie_jar = info(serde_json::json!({
            "url": "https://scontent.cdninstagram.com/v.mp4",
            "protocol": "https",
            "http_headers": {"User-Agent": "ua"},
            "cookies": "sessionid=abc; Domain=.instagram.com; Path=/; Secure"
        }));
        assert!(direct_media(&with_cookie_jar).is_none());

        let empty_cookie_jar = info(serde_json::json!({
            "url": "https://video.twimg.com/v.mp4",
            "protocol": "https",
            "cookies": ""
        }));
        assert!(direct_media(&empty_cookie_jar).is_some());
    }

    #[test]
    fn titles_are_sanitized_for_filenames() {
        assert_eq!(sanitize_title(Some("My clip: part/2 <final>")), "My clip part2 final");
        assert_eq!(sanitize_title(Some("  ")), "video");
        assert_eq!(sanitize_title(None), "video");
        assert_eq!(sanitize_title(Some(&"a".repeat(200))).len(), 80);
    }

    #[test]
    fn youtube_hosts_are_detected() {
        assert!(is_youtube_url("https://www.youtube.com/watch?v=1"));
        assert!(is_youtube_url("https://youtu.be/1"));
        assert!(is_youtube_url("https://music.youtube.com/watch?v=1"));
        assert!(!is_youtube_url("https://x.com/a/status/1"));
    }

    #[test]
    fn pot_retry_only_for_youtube_with_provider() {
        let mut extractor = ytdlp();
        assert_eq!(extractor.attempts(true), vec![Attempt::Vanilla]);

        extractor.pot_provider_url = Some("http://127.0.0.1:4416".to_string());
        assert_eq!(
            extractor.attempts(true),
            vec![Attempt::Vanilla, Attempt::PoToken]
        );
        assert_eq!(extractor.attempts(false), vec![Attempt::Vanilla]);

        let dir = tempfile::tempdir().expect("tempdir");
        let args = extractor.base_args(true, Attempt::PoToken, &options(dir.path()));
        assert!(args.contains(&"youtubepot-bgutilhttp:base_url=http://127.0.0.1:4416".to_string()));
        assert!(!args.contains(&"--add-header".to_string()));
    }

    #[test]
    fn non_youtube_sources_get_browser_headers_and_cookies() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut opts = options(dir.path());
        opts.cookies_file = Some(PathBuf::from("/srv/cookies.txt"));

        let args = ytdlp().base_args(false, Attempt::Vanilla, &opts);
        assert!(args.iter().any(|arg| arg.starts_with("User-Agent:Mozilla/5.0")));
        let cookies_at = args.iter().position(|arg| arg == "--cookies").expect("cookies flag");
        assert_eq!(args[cookies_at + 1], "/srv/cookies.txt");
    }

    #[test]
    fn printed_path_is_last_non_empty_line() {
        let stdout = b"[download] 100%\n/tmp/job/abc.mp4\n\n";
        assert_eq!(
            extract_printed_path(stdout).as_deref(),
            Some("/tmp/job/abc.mp4")
        );
        assert_eq!(extract_printed_path(b"\n \n"), None);
    }

    #[tokio::test]
    async fn downloaded_file_must_live_in_job_dir() {
        let root = tempfile::tempdir().expect("tempdir");
        let job_dir = root.path().join("job");
        tokio::fs::create_dir_all(&job_dir).await.expect("mkdir");
        let outside = root.path().join("outside.mp4");
        tokio::fs::write(&outside, b"x").await.expect("write");

        let result = resolve_downloaded_file(&job_dir, outside.to_str()).await;
        assert!(matches!(result, Err(ExtractionError::Internal(_))));

        tokio::fs::write(job_dir.join("abc.mp4.part"), b"x").await.expect("write");
        tokio::fs::write(job_dir.join("abc.mp4"), b"x").await.expect("write");
        let resolved = resolve_downloaded_file(&job_dir, Some("abc.mp4"))
            .await
            .expect("resolved");
        assert!(resolved.ends_with("abc.mp4"));

        let scanned = resolve_downloaded_file(&job_dir, None).await.expect("scanned");
        assert!(scanned.ends_with("abc.mp4"));
    }

    #[tokio::test]
    async fn missing_binary_is_an_internal_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut extractor = ytdlp();
        extractor.binary = dir.path().join("no-such-yt-dlp").to_string_lossy().into_owned();

        let result = extractor
            .resolve("https://x.com/a/status/1", &options(dir.path()))
            .await;
        assert!(matches!(
            result,
            Err(ExtractionError::Internal(message)) if message.contains("not installed")
        ));
    }

    #[cfg(unix)]
    fn fake_ytdlp(dir: &Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-yt-dlp");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod script");
        path.to_string_lossy().into_owned()
    }

    // Answers -J with an HLS format so extraction moves on to the download
    // phase, then leaves a partial file next to the -o template and hangs.
    #[cfg(unix)]
    const HANGING_DOWNLOAD: &str = r#"
for arg in "$@"; do
  if [ "$arg" = "-J" ]; then
    cat <<'JSON'
{"id": "abc", "title": "clip", "ext": "mp4", "protocol": "m3u8_native",
 "url": "https://cdn.example/master.m3u8"}
JSON
    exit 0
  fi
done
prev=""
for arg in "$@"; do
  if [ "$prev" = "-o" ]; then out="$arg"; fi
  prev="$arg"
done
echo partial > "$(dirname "$out")/abc.mp4.part"
exec sleep 30
"#;

    #[cfg(unix)]
    #[tokio::test]
    async fn hung_download_times_out_and_job_dir_is_cleaned() {
        let bin_dir = tempfile::tempdir().expect("tempdir");
        let transfer = tempfile::tempdir().expect("tempdir");
        let mut extractor = ytdlp();
        extractor.binary = fake_ytdlp(bin_dir.path(), HANGING_DOWNLOAD);
        extractor.timeout = Duration::from_secs(1);

        let job = JobDir::create(transfer.path()).await.expect("job dir");
        let job_path = job.path().to_path_buf();
        let result = extractor
            .resolve("https://x.com/a/status/1", &options(&job_path))
            .await;

        assert!(matches!(result, Err(ExtractionError::Transient(_))), "{result:?}");
        assert!(job_path.join("abc.mp4.part").exists());

        drop(job);
        assert!(eventually(|| !job_path.exists()).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_tool_is_classified_from_stderr() {
        let bin_dir = tempfile::tempdir().expect("tempdir");
        let mut extractor = ytdlp();
        extractor.binary = fake_ytdlp(
            bin_dir.path(),
            "echo 'ERROR: [instagram] xyz: Requested content is not available, \
             rate-limit reached or login required' >&2\nexit 1",
        );

        let result = extractor
            .resolve("https://www.instagram.com/reel/xyz/", &options(bin_dir.path()))
            .await;
        assert!(matches!(result, Err(ExtractionError::Blocked(_))), "{result:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn progressive_format_from_tool_resolves_to_direct_link() {
        let bin_dir = tempfile::tempdir().expect("tempdir");
        let mut extractor = ytdlp();
        extractor.binary = fake_ytdlp(
            bin_dir.path(),
            r#"cat <<'JSON'
{"id": "123", "title": "Clip: one", "ext": "mp4", "protocol": "https",
 "url": "https://video.twimg.com/123.mp4", "http_headers": {"User-Agent": "ua"}}
JSON"#,
        );

        let result = extractor
            .resolve("https://x.com/a/status/123", &options(bin_dir.path()))
            .await
            .expect("direct link");
        assert_eq!(
            result,
            Extraction::Direct {
                url: "https://video.twimg.com/123.mp4".to_string(),
                headers: vec![("User-Agent".to_string(), "ua".to_string())],
                filename: "Clip one.mp4".to_string(),
            }
        );
    }
}
