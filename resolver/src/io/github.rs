//! [`RepositoryHost`] backed by the GitHub REST API through `gh api`.

use std::io::Read;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use tracing::{debug, info, instrument};
use url::Url;

use crate::error::PullRequestCreationError;
use crate::io::host::{PullRequest, PullRequestDraft, RepositoryHost};
use crate::io::process::{CommandOutput, run_command_with_timeout};

const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";
const DIFF_MEDIA_TYPE: &str = "application/vnd.github.diff";
const API_TIMEOUT: Duration = Duration::from_secs(120);
const API_OUTPUT_LIMIT_BYTES: usize = 100_000_000;
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);
const DOWNLOAD_LIMIT_BYTES: u64 = 100_000_000;

#[derive(Debug, Clone)]
pub struct GithubHost {
    owner: String,
    name: String,
    command: String,
}

impl GithubHost {
    /// `repository` is `owner/name`; `command` is the `gh` executable.
    pub fn new(repository: &str, command: impl Into<String>) -> Result<Self> {
        let (owner, name) = parse_repository(repository)?;
        Ok(Self {
            owner,
            name,
            command: command.into(),
        })
    }

    fn endpoint(&self, segments: &[&str], query: &[(&str, &str)]) -> Result<String> {
        let mut all = vec!["repos", self.owner.as_str(), self.name.as_str()];
        all.extend_from_slice(segments);
        build_endpoint(&all, query)
    }

    fn api_command(&self, method: &str, endpoint: &str, accept: &str) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.arg("api")
            .arg("-X")
            .arg(method)
            .arg(endpoint)
            .arg("-H")
            .arg(format!("Accept: {accept}"));
        cmd
    }

    fn call(
        &self,
        method: &str,
        endpoint: &str,
        accept: &str,
        body: Option<&Value>,
    ) -> Result<CommandOutput> {
        let mut cmd = self.api_command(method, endpoint, accept);
        let input = match body {
            Some(body) => {
                cmd.arg("--input").arg("-");
                Some(serde_json::to_vec(body).context("serialize request body")?)
            }
            None => None,
        };
        debug!(method, endpoint, "gh api");
        run_command_with_timeout(cmd, input.as_deref(), API_TIMEOUT, API_OUTPUT_LIMIT_BYTES)
            .with_context(|| format!("run gh api {method} {endpoint}"))
    }

    /// JSON response, or `None` when the host answers 404.
    fn api_optional(&self, method: &str, endpoint: &str, body: Option<&Value>) -> Result<Option<Value>> {
        let output = self.call(method, endpoint, JSON_MEDIA_TYPE, body)?;
        if !output.success() {
            if output.stderr_tail().contains("HTTP 404") {
                return Ok(None);
            }
            bail!(
                "gh api {method} {endpoint} failed: {}",
                output.failure_summary(&self.command, API_TIMEOUT)
            );
        }
        parse_json_output(&output.stdout)
            .with_context(|| format!("parse response of gh api {method} {endpoint}"))
            .map(Some)
    }

    fn api(&self, method: &str, endpoint: &str, body: Option<&Value>) -> Result<Value> {
        self.api_optional(method, endpoint, body)?
            .ok_or_else(|| anyhow!("gh api {method} {endpoint} failed: HTTP 404 Not Found"))
    }

    /// Every item of a list endpoint, following `Link` headers page by page.
    fn api_list(&self, endpoint: &str) -> Result<Vec<Value>> {
        let mut cmd = self.api_command("GET", endpoint, JSON_MEDIA_TYPE);
        cmd.arg("--paginate");
        debug!(endpoint, "gh api --paginate");
        let output = run_command_with_timeout(cmd, None, API_TIMEOUT, API_OUTPUT_LIMIT_BYTES)
            .with_context(|| format!("run gh api --paginate {endpoint}"))?;
        if !output.success() {
            bail!(
                "gh api GET {endpoint} failed: {}",
                output.failure_summary(&self.command, API_TIMEOUT)
            );
        }
        if output.stdout_truncated > 0 {
            bail!("gh api GET {endpoint} returned more than {API_OUTPUT_LIMIT_BYTES} bytes");
        }
        parse_json_pages(&output.stdout)
            .with_context(|| format!("parse response of gh api GET {endpoint}"))
    }

    fn branch_sha(&self, branch: &str) -> Result<Option<String>> {
        let mut segments = vec!["git", "ref", "heads"];
        segments.extend(branch.split('/'));
        let endpoint = self.endpoint(&segments, &[])?;
        let Some(value) = self.api_optional("GET", &endpoint, None)? else {
            return Ok(None);
        };
        let sha = value
            .pointer("/object/sha")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("ref heads/{branch} has no object sha"))?;
        Ok(Some(sha.to_string()))
    }

    fn contents(&self, branch: &str, path: &str) -> Result<Option<Value>> {
        let endpoint = self.contents_endpoint(path, &[("ref", branch)])?;
        let value = self.api_optional("GET", &endpoint, None)?;
        if let Some(Value::Array(_)) = value {
            bail!("{path} is a directory on branch {branch}");
        }
        Ok(value)
    }

    fn contents_endpoint(&self, path: &str, query: &[(&str, &str)]) -> Result<String> {
        let mut segments = vec!["contents"];
        segments.extend(path.split('/'));
        self.endpoint(&segments, query)
    }

    fn blob_sha(&self, branch: &str, path: &str) -> Result<Option<String>> {
        Ok(self
            .contents(branch, path)?
            .and_then(|value| value.get("sha").and_then(Value::as_str).map(str::to_string)))
    }
}

impl RepositoryHost for GithubHost {
    fn default_branch(&self) -> Result<String> {
        let value = self.api("GET", &self.endpoint(&[], &[])?, None)?;
        let branch = value
            .get("default_branch")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        if branch.is_empty() {
            bail!("repository {}/{} reports no default branch", self.owner, self.name);
        }
        Ok(branch.to_string())
    }

    #[instrument(skip_all, fields(issue = issue))]
    fn issue_discussion(&self, issue: u64) -> Result<String> {
        let number = issue.to_string();
        let value = self.api("GET", &self.endpoint(&["issues", &number], &[])?, None)?;
        let comments =
            self.api_list(&self.endpoint(&["issues", &number, "comments"], &[("per_page", "100")])?)?;
        debug!(comments = comments.len(), "read issue comments");
        Ok(render_discussion(&value, &comments))
    }

    fn list_files(&self, branch: &str) -> Result<Vec<String>> {
        let sha = self
            .branch_sha(branch)?
            .ok_or_else(|| anyhow!("branch {branch} does not exist"))?;
        let endpoint = self.endpoint(&["git", "trees", &sha], &[("recursive", "1")])?;
        let value = self.api("GET", &endpoint, None)?;
        let files = value
            .get("tree")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|entry| entry.get("type").and_then(Value::as_str) == Some("blob"))
                    .filter_map(|entry| entry.get("path").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(files)
    }

    fn branch_exists(&self, branch: &str) -> Result<bool> {
        Ok(self.branch_sha(branch)?.is_some())
    }

    #[instrument(skip_all, fields(name = %name, parent = %parent))]
    fn create_branch(&self, name: &str, parent: &str) -> Result<()> {
        let sha = self
            .branch_sha(parent)?
            .ok_or_else(|| anyhow!("parent branch {parent} does not exist"))?;
        let body = json!({ "ref": format!("refs/heads/{name}"), "sha": sha });
        self.api("POST", &self.endpoint(&["git", "refs"], &[])?, Some(&body))
            .with_context(|| format!("create branch {name} from {parent}"))?;
        info!(name, parent, "created branch");
        Ok(())
    }

    fn read_file(&self, branch: &str, path: &str) -> Result<Option<Vec<u8>>> {
        let Some(value) = self.contents(branch, path)? else {
            return Ok(None);
        };
        let encoding = value.get("encoding").and_then(Value::as_str);
        let content = value.get("content").and_then(Value::as_str).unwrap_or_default();
        if encoding == Some("base64") && !content.is_empty() {
            return decode_content(content).map(Some);
        }
        // Large files come back without inline content.
        let sha = value
            .get("sha")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("contents of {path} carry no blob sha"))?;
        let blob = self.api("GET", &self.endpoint(&["git", "blobs", sha], &[])?, None)?;
        let content = blob.get("content").and_then(Value::as_str).unwrap_or_default();
        decode_content(content).map(Some)
    }

    #[instrument(skip_all, fields(branch = %branch, path = %path))]
    fn write_file(&self, branch: &str, path: &str, content: &[u8], message: &str) -> Result<()> {
        let mut body = json!({
            "message": message,
            "content": STANDARD.encode(content),
            "branch": branch,
        });
        if let Some(sha) = self.blob_sha(branch, path)? {
            body["sha"] = Value::String(sha);
        }
        self.api("PUT", &self.contents_endpoint(path, &[])?, Some(&body))
            .with_context(|| format!("write {path} on {branch}"))?;
        info!(branch, path, "committed file");
        Ok(())
    }

    #[instrument(skip_all, fields(branch = %branch, path = %path))]
    fn delete_file(&self, branch: &str, path: &str, message: &str) -> Result<()> {
        let sha = self
            .blob_sha(branch, path)?
            .ok_or_else(|| anyhow!("file {path} does not exist on branch {branch}"))?;
        let body = json!({ "message": message, "sha": sha, "branch": branch });
        self.api("DELETE", &self.contents_endpoint(path, &[])?, Some(&body))
            .with_context(|| format!("delete {path} on {branch}"))?;
        info!(branch, path, "deleted file");
        Ok(())
    }

    fn download(&self, branch: &str, url: &str, target: &str, message: &str) -> Result<()> {
        let bytes = fetch_url(url)?;
        self.write_file(branch, target, &bytes, message)
    }

    fn diff(&self, base: &str, head: &str) -> Result<String> {
        let basehead = format!("{base}...{head}");
        let endpoint = self.endpoint(&["compare", &basehead], &[])?;
        let output = self.call("GET", &endpoint, DIFF_MEDIA_TYPE, None)?;
        if !output.success() {
            bail!(
                "gh api GET {endpoint} failed: {}",
                output.failure_summary(&self.command, API_TIMEOUT)
            );
        }
        Ok(output.stdout_text())
    }

    #[instrument(skip_all, fields(head = %draft.head, base = %draft.base))]
    fn open_pull_request(&self, draft: &PullRequestDraft) -> Result<PullRequest> {
        let body = json!({
            "title": draft.title,
            "head": draft.head,
            "base": draft.base,
            "body": draft.body,
        });
        let endpoint = self.endpoint(&["pulls"], &[])?;
        let output = self.call("POST", &endpoint, JSON_MEDIA_TYPE, Some(&body))?;
        if !output.success() {
            return Err(PullRequestCreationError {
                head: draft.head.clone(),
                base: draft.base.clone(),
                message: output.failure_summary(&self.command, API_TIMEOUT),
            }
            .into());
        }
        let value = parse_json_output(&output.stdout).context("parse created pull request")?;
        let number = value
            .get("number")
            .and_then(Value::as_u64)
            .ok_or_else(|| anyhow!("created pull request has no number"))?;
        let url = value
            .get("html_url")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        info!(number, "opened pull request");
        Ok(PullRequest { number, url })
    }

    fn post_comment(&self, issue: u64, body: &str) -> Result<()> {
        let number = issue.to_string();
        let endpoint = self.endpoint(&["issues", &number, "comments"], &[])?;
        self.api("POST", &endpoint, Some(&json!({ "body": body })))
            .with_context(|| format!("comment on #{issue}"))?;
        info!(issue, "posted comment");
        Ok(())
    }

    fn pull_request_diff(&self, number: u64) -> Result<String> {
        let endpoint = self.endpoint(&["pulls", &number.to_string()], &[])?;
        let output = self.call("GET", &endpoint, DIFF_MEDIA_TYPE, None)?;
        if !output.success() {
            bail!(
                "gh api GET {endpoint} failed: {}",
                output.failure_summary(&self.command, API_TIMEOUT)
            );
        }
        Ok(output.stdout_text())
    }

    #[instrument(skip_all, fields(title = %title))]
    fn create_issue(&self, title: &str, body: &str) -> Result<u64> {
        let endpoint = self.endpoint(&["issues"], &[])?;
        let value = self
            .api("POST", &endpoint, Some(&json!({ "title": title, "body": body })))
            .with_context(|| format!("create issue '{title}'"))?;
        let number = value
            .get("number")
            .and_then(Value::as_u64)
            .ok_or_else(|| anyhow!("created issue has no number"))?;
        info!(number, "created issue");
        Ok(number)
    }
}

fn parse_repository(repository: &str) -> Result<(String, String)> {
    let trimmed = repository.trim().trim_end_matches(".git");
    match trimmed.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok((owner.to_string(), name.to_string()))
        }
        _ => bail!("repository must look like owner/name, got '{repository}'"),
    }
}

/// Percent-encoded API path (no leading slash) plus query string.
fn build_endpoint(segments: &[&str], query: &[(&str, &str)]) -> Result<String> {
    let mut url = Url::parse("https://api.github.com/").context("parse api base url")?;
    url.path_segments_mut()
        .map_err(|()| anyhow!("api base url cannot hold path segments"))?
        .clear()
        .extend(segments);
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }
    let mut endpoint = url.path().trim_start_matches('/').to_string();
    if let Some(query) = url.query() {
        endpoint.push('?');
        endpoint.push_str(query);
    }
    Ok(endpoint)
}

fn parse_json_output(stdout: &[u8]) -> Result<Value> {
    let text = String::from_utf8_lossy(stdout);
    if text.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(text.trim()).context("parse gh api json")
}

/// `gh api --paginate` prints one JSON array per page, back to back.
fn parse_json_pages(stdout: &[u8]) -> Result<Vec<Value>> {
    let mut items = Vec::new();
    for page in serde_json::Deserializer::from_slice(stdout).into_iter::<Value>() {
        match page.context("parse gh api json page")? {
            Value::Array(entries) => items.extend(entries),
            other => bail!("expected a json array page, got {other}"),
        }
    }
    Ok(items)
}

/// Decode a contents-API payload (base64 wrapped at 60 columns).
fn decode_content(content: &str) -> Result<Vec<u8>> {
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD.decode(compact).context("decode base64 file content")
}

fn render_discussion(issue: &Value, comments: &[Value]) -> String {
    let title = issue.get("title").and_then(Value::as_str).unwrap_or_default();
    let mut text = format!("# {title}\n");
    let mut push_entry = |entry: &Value| {
        let author = entry
            .pointer("/user/login")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let body = entry.get("body").and_then(Value::as_str).unwrap_or_default();
        text.push_str(&format!("\n{author}: {}\n", body.trim()));
    };
    push_entry(issue);
    for comment in comments {
        push_entry(comment);
    }
    text
}

/// Fetch an http(s) resource into memory.
#[instrument(skip_all, fields(url = %url))]
pub fn fetch_url(url: &str) -> Result<Vec<u8>> {
    let agent = ureq::AgentBuilder::new().timeout(DOWNLOAD_TIMEOUT).build();
    let response = agent
        .get(url)
        .call()
        .with_context(|| format!("download {url}"))?;
    let bytes = read_limited(response.into_reader(), DOWNLOAD_LIMIT_BYTES)
        .with_context(|| format!("read body of {url}"))?;
    debug!(bytes = bytes.len(), "downloaded");
    Ok(bytes)
}

/// Read `reader` to the end, failing when it holds more than `limit` bytes.
fn read_limited(reader: impl Read, limit: u64) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    reader.take(limit.saturating_add(1)).read_to_end(&mut bytes)?;
    if bytes.len() as u64 > limit {
        bail!("body exceeds the download limit of {limit} bytes");
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_owner_and_name() {
        assert_eq!(
            parse_repository("octo/hello.git").expect("parse"),
            ("octo".to_string(), "hello".to_string())
        );
        assert!(parse_repository("octo").is_err());
        assert!(parse_repository("a/b/c").is_err());
    }

    #[test]
    fn endpoint_encodes_segments_and_query() {
        let endpoint = build_endpoint(
            &["repos", "o", "r", "contents", "docs", "my file.md"],
            &[("ref", "resolver/issue-1")],
        )
        .expect("endpoint");
        assert_eq!(
            endpoint,
            "repos/o/r/contents/docs/my%20file.md?ref=resolver%2Fissue-1"
        );
    }

    #[test]
    fn decodes_wrapped_base64() {
        let encoded = "aGVsbG8g\nd29ybGQ=\n";
        assert_eq!(decode_content(encoded).expect("decode"), b"hello world");
    }

    #[test]
    fn renders_issue_and_comments() {
        let issue = json!({"title": "Add report", "body": "Please add report.py", "user": {"login": "alice"}});
        let comments = vec![json!({"body": "with a main()", "user": {"login": "bob"}})];
        let text = render_discussion(&issue, &comments);
        assert_eq!(
            text,
            "# Add report\n\nalice: Please add report.py\n\nbob: with a main()\n"
        );
    }

    #[test]
    fn comment_pages_are_concatenated() {
        let stdout = br#"[{"id": 1}, {"id": 2}]
[{"id": 3}]"#;
        let ids: Vec<_> = parse_json_pages(stdout)
            .expect("pages")
            .iter()
            .filter_map(|item| item.get("id").and_then(Value::as_u64))
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(parse_json_pages(b"").expect("no pages").is_empty());
        assert!(parse_json_pages(br#"{"message": "oops"}"#).is_err());
    }

    #[cfg(unix)]
    mod with_fake_cli {
        use super::*;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;

        /// Install a `gh` stand-in that logs its arguments and stdin and
        /// prints `stdout` (exit 0) or `stderr` (exit 1).
        fn fake_gh(dir: &Path, stdout: &str, stderr: Option<&str>) -> String {
            let script = dir.join("gh");
            let tail = match stderr {
                Some(message) => format!("echo '{message}' >&2\nexit 1\n"),
                None => format!("cat <<'EOF'\n{stdout}\nEOF\n"),
            };
            let body = format!(
                "#!/bin/sh\necho \"$@\" >> '{log}'\ncat >> '{log}'\n{tail}",
                log = dir.join("calls.log").display()
            );
            fs::write(&script, body).expect("write script");
            fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("chmod");
            script.display().to_string()
        }

        fn calls(dir: &Path) -> String {
            fs::read_to_string(dir.join("calls.log")).unwrap_or_default()
        }

        #[test]
        fn default_branch_reads_repository_metadata() {
            let temp = tempfile::tempdir().expect("tempdir");
            let gh = fake_gh(temp.path(), r#"{"default_branch": "develop"}"#, None);
            let host = GithubHost::new("o/r", gh).expect("host");

            assert_eq!(host.default_branch().expect("branch"), "develop");
            assert!(calls(temp.path()).contains("api -X GET repos/o/r -H Accept: application/vnd.github+json"));
        }

        #[test]
        fn discussion_follows_every_comment_page() {
            let temp = tempfile::tempdir().expect("tempdir");
            let log = temp.path().join("calls.log");
            let script = temp.path().join("gh");
            let body = format!(
                "#!/bin/sh\necho \"$@\" >> '{log}'\n\
                 case \"$*\" in\n\
                 *--paginate*) printf '[{{\"body\":\"one\",\"user\":{{\"login\":\"bob\"}}}}][{{\"body\":\"two\",\"user\":{{\"login\":\"carol\"}}}}]' ;;\n\
                 *) printf '{{\"title\":\"T\",\"body\":\"help\",\"user\":{{\"login\":\"alice\"}}}}' ;;\n\
                 esac\n",
                log = log.display()
            );
            fs::write(&script, body).expect("write script");
            fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("chmod");
            let host = GithubHost::new("o/r", script.display().to_string()).expect("host");

            let text = host.issue_discussion(9).expect("discussion");
            assert_eq!(text, "# T\n\nalice: help\n\nbob: one\n\ncarol: two\n");
            assert!(calls(temp.path()).contains("repos/o/r/issues/9/comments?per_page=100 -H Accept: application/vnd.github+json --paginate"));
        }

        #[test]
        fn missing_file_reads_as_none() {
            let temp = tempfile::tempdir().expect("tempdir");
            let gh = fake_gh(temp.path(), "", Some("gh: Not Found (HTTP 404)"));
            let host = GithubHost::new("o/r", gh).expect("host");

            assert_eq!(host.read_file("main", "nope.txt").expect("read"), None);
        }

        #[test]
        fn comment_body_is_sent_on_stdin() {
            let temp = tempfile::tempdir().expect("tempdir");
            let gh = fake_gh(temp.path(), r#"{"id": 1}"#, None);
            let host = GithubHost::new("o/r", gh).expect("host");

            host.post_comment(7, "all done").expect("comment");
            let log = calls(temp.path());
            assert!(log.contains("-X POST repos/o/r/issues/7/comments"));
            assert!(log.contains(r#"{"body":"all done"}"#));
        }

        #[test]
        fn created_issue_number_is_returned() {
            let temp = tempfile::tempdir().expect("tempdir");
            let gh = fake_gh(temp.path(), r#"{"number": 31, "html_url": "https://github.com/o/r/issues/31"}"#, None);
            let host = GithubHost::new("o/r", gh).expect("host");

            assert_eq!(host.create_issue("Plot data", "details").expect("issue"), 31);
            let log = calls(temp.path());
            assert!(log.contains("-X POST repos/o/r/issues -H"));
            assert!(log.contains(r#"{"body":"details","title":"Plot data"}"#));
        }

        #[test]
        fn pull_request_diff_asks_for_diff_media_type() {
            let temp = tempfile::tempdir().expect("tempdir");
            let gh = fake_gh(temp.path(), "--- a/x.py\n+++ b/x.py", None);
            let host = GithubHost::new("o/r", gh).expect("host");

            assert!(host.pull_request_diff(5).expect("diff").contains("+++ b/x.py"));
            assert!(calls(temp.path()).contains("-X GET repos/o/r/pulls/5 -H Accept: application/vnd.github.diff"));
        }

        #[test]
        fn rejected_pull_request_is_typed() {
            let temp = tempfile::tempdir().expect("tempdir");
            let gh = fake_gh(temp.path(), "", Some("gh: Validation Failed (HTTP 422)"));
            let host = GithubHost::new("o/r", gh).expect("host");

            let err = host
                .open_pull_request(&PullRequestDraft {
                    title: "t".to_string(),
                    head: "resolver/issue-1".to_string(),
                    base: "main".to_string(),
                    body: "b".to_string(),
                })
                .unwrap_err();
            let rejected = err
                .downcast_ref::<PullRequestCreationError>()
                .expect("typed error");
            assert!(rejected.message.contains("HTTP 422"));
        }

        #[test]
        fn other_failures_carry_stderr() {
            let temp = tempfile::tempdir().expect("tempdir");
            let gh = fake_gh(temp.path(), "", Some("gh: Bad credentials (HTTP 401)"));
            let host = GithubHost::new("o/r", gh).expect("host");

            let err = host.branch_exists("main").unwrap_err();
            assert!(format!("{err:#}").contains("HTTP 401"));
        }
    }

    #[test]
    fn read_limited_rejects_bodies_over_the_limit() {
        assert_eq!(
            read_limited(std::io::Cursor::new(b"0123456789"), 10).expect("exactly at limit"),
            b"0123456789"
        );
        let err = read_limited(std::io::Cursor::new(b"0123456789A"), 10).unwrap_err();
        assert!(err.to_string().contains("limit of 10 bytes"));
    }
}
