use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};

use crate::bridge::IssueTracker;

const ISSUES_PAGE_SIZE: u32 = 100;
const MAX_ISSUE_PAGES: usize = 10;
const COMMENTS_PER_ISSUE: u32 = 50;

#[derive(Debug, Error)]
pub enum LinearError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Linear API error: {0}")]
    Api(String),

    #[error("missing field in Linear response: {0}")]
    MissingField(&'static str),

    #[error("attachment upload failed: {0}")]
    Upload(String),

    #[error("updated issues span more than {0} pages")]
    PageLimit(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LinearIssue {
    pub id: String,
    pub identifier: String,
    pub title: String,
    pub url: String,
}

/// An issue that changed since the last poll, with its current workflow state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueUpdate {
    pub id: String,
    pub identifier: String,
    pub status_name: String,
    pub updated_at: String,
    pub comments: Vec<IssueComment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueComment {
    pub id: String,
    pub body: String,
    pub author: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadFile {
    upload_url: String,
    asset_url: String,
    #[serde(default)]
    headers: Vec<UploadHeader>,
}

#[derive(Debug, Deserialize)]
struct UploadHeader {
    key: String,
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssuesPage {
    nodes: Vec<IssueNode>,
    page_info: PageInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueNode {
    id: String,
    identifier: String,
    updated_at: String,
    state: Option<NamedNode>,
    #[serde(default)]
    comments: Option<CommentConnection>,
}

#[derive(Debug, Deserialize)]
struct NamedNode {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentConnection {
    nodes: Vec<CommentNode>,
    #[serde(default)]
    page_info: Option<CommentPageInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentPageInfo {
    has_next_page: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentNode {
    id: String,
    body: String,
    created_at: String,
    user: Option<CommentUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentUser {
    name: String,
    display_name: Option<String>,
}

impl From<IssueNode> for IssueUpdate {
    fn from(node: IssueNode) -> Self {
        let truncated = node
            .comments
            .as_ref()
            .and_then(|connection| connection.page_info.as_ref())
            .is_some_and(|info| info.has_next_page);
        if truncated {
            warn!(
                issue = %node.identifier,
                limit = COMMENTS_PER_ISSUE,
                "issue has more comments than one page, later ones are not mirrored"
            );
        }

        let mut comments: Vec<IssueComment> = node
            .comments
            .map(|connection| connection.nodes)
            .unwrap_or_default()
            .into_iter()
            .map(|comment| IssueComment {
                id: comment.id,
                body: comment.body,
                author: comment
                    .user
                    .map(|user| user.display_name.unwrap_or(user.name))
                    .unwrap_or_else(|| "Linear".to_string()),
                created_at: comment.created_at,
            })
            .collect();
        // ISO 8601 timestamps sort lexically
        comments.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        Self {
            id: node.id,
            identifier: node.identifier,
            status_name: node.state.map(|state| state.name).unwrap_or_default(),
            updated_at: node.updated_at,
            comments,
        }
    }
}

pub struct LinearClient {
    client: Client,
    api_key: SecretString,
    api_url: String,
}

impl LinearClient {
    pub fn new(api_key: SecretString, api_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            api_url: api_url.into(),
        }
    }

    pub async fn create_issue(
        &self,
        team_id: &str,
        title: &str,
        description: &str,
        label_ids: &[String],
    ) -> Result<LinearIssue, LinearError> {
        let query = r#"
            mutation CreateIssue($input: IssueCreateInput!) {
                issueCreate(input: $input) {
                    success
                    issue {
                        id
                        identifier
                        title
                        url
                    }
                }
            }
        "#;

        let variables = json!({
            "input": {
                "teamId": team_id,
                "title": title,
                "description": description,
                "labelIds": label_ids,
            }
        });

        let data = self.execute(query, variables).await?;
        let issue = data
            .pointer("/issueCreate/issue")
            .filter(|issue| !issue.is_null())
            .cloned()
            .ok_or(LinearError::MissingField("issueCreate.issue"))?;

        serde_json::from_value(issue)
            .map_err(|e| LinearError::Api(format!("unexpected issue payload: {e}")))
    }

    /// Issues of `team_id` updated strictly after `since` (ISO 8601), following pagination.
    pub async fn get_updated_issues(
        &self,
        team_id: &str,
        since: &str,
    ) -> Result<Vec<IssueUpdate>, LinearError> {
        let query = format!(
            r#"
            query UpdatedIssues($teamId: String!, $since: DateTime!, $after: String) {{
                issues(
                    filter: {{
                        team: {{ id: {{ eq: $teamId }} }}
                        updatedAt: {{ gt: $since }}
                    }}
                    first: {ISSUES_PAGE_SIZE}
                    after: $after
                ) {{
                    nodes {{
                        id
                        identifier
                        updatedAt
                        state {{
                            name
                        }}
                        comments(first: {COMMENTS_PER_ISSUE}) {{
                            nodes {{
                                id
                                body
                                createdAt
                                user {{
                                    name
                                    displayName
                                }}
                            }}
                            pageInfo {{
                                hasNextPage
                            }}
                        }}
                    }}
                    pageInfo {{
                        hasNextPage
                        endCursor
                    }}
                }}
            }}
        "#
        );

        collect_issue_pages(|after| {
            let query = query.as_str();
            async move {
                let variables = json!({
                    "teamId": team_id,
                    "since": since,
                    "after": after,
                });

                let data = self.execute(query, variables).await?;
                serde_json::from_value(
                    data.get("issues")
                        .cloned()
                        .ok_or(LinearError::MissingField("issues"))?,
                )
                .map_err(|e| LinearError::Api(format!("unexpected issues payload: {e}")))
            }
        })
        .await
    }

    /// Mirrors a remote file into Linear's storage and returns the asset url.
    pub async fn upload_from_url(&self, url: &str, filename: &str) -> Result<String, LinearError> {
        let (data, content_type) = self.download_attachment(url).await?;
        let upload = self
            .request_file_upload(filename, &content_type, data.len() as u64)
            .await?;
        self.upload_file_to_url(&upload, data, &content_type).await
    }

    async fn request_file_upload(
        &self,
        filename: &str,
        content_type: &str,
        size: u64,
    ) -> Result<UploadFile, LinearError> {
        let query = r#"
            mutation FileUpload($contentType: String!, $filename: String!, $size: Int!) {
                fileUpload(contentType: $contentType, filename: $filename, size: $size) {
                    uploadFile {
                        uploadUrl
                        assetUrl
                        headers {
                            key
                            value
                        }
                    }
                }
            }
        "#;

        let variables = json!({
            "contentType": content_type,
            "filename": filename,
            "size": size,
        });

        let data = self.execute(query, variables).await?;
        let upload = data
            .pointer("/fileUpload/uploadFile")
            .filter(|upload| !upload.is_null())
            .cloned()
            .ok_or(LinearError::MissingField("fileUpload.uploadFile"))?;

        serde_json::from_value(upload)
            .map_err(|e| LinearError::Upload(format!("unexpected upload payload: {e}")))
    }

    async fn upload_file_to_url(
        &self,
        upload: &UploadFile,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<String, LinearError> {
        let mut request = self
            .client
            .put(&upload.upload_url)
            .header("Content-Type", content_type);

        for header in &upload.headers {
            request = request.header(&header.key, &header.value);
        }

        let response = request
            .body(data)
            .send()
            .await
            .map_err(|e| LinearError::Upload(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LinearError::Upload(format!(
                "upload returned {status}: {body}"
            )));
        }

        debug!(asset_url = %upload.asset_url, "file uploaded to Linear");
        Ok(upload.asset_url.clone())
    }

    async fn download_attachment(&self, url: &str) -> Result<(Vec<u8>, String), LinearError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| LinearError::Upload(format!("download failed: {e}")))?;

        if !response.status().is_success() {
            return Err(LinearError::Upload(format!(
                "download of {url} returned {}",
                response.status()
            )));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| LinearError::Upload(format!("failed to read body: {e}")))?;

        Ok((bytes.to_vec(), content_type))
    }

    async fn execute(&self, query: &str, variables: Value) -> Result<Value, LinearError> {
        #[derive(Serialize)]
        struct GraphQLRequest<'a> {
            query: &'a str,
            variables: Value,
        }

        let response: GraphQLResponse = self
            .client
            .post(&self.api_url)
            .header("Authorization", self.api_key.expose_secret())
            .header("Content-Type", "application/json")
            .json(&GraphQLRequest { query, variables })
            .send()
            .await?
            .json()
            .await?;

        response.into_data()
    }
}

#[derive(Debug, Deserialize)]
struct GraphQLResponse {
    data: Option<Value>,
    errors: Option<Vec<GraphQLError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQLError {
    message: String,
}

impl GraphQLResponse {
    fn into_data(self) -> Result<Value, LinearError> {
        if let Some(errors) = self.errors.filter(|errors| !errors.is_empty()) {
            let combined = errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join("; ");
            warn!(errors = %combined, "Linear API returned errors");
            return Err(LinearError::Api(combined));
        }

        self.data
            .ok_or_else(|| LinearError::Api("no data in response".to_string()))
    }
}

/// Follows `issues` pagination. Hitting the page cap is an error so the caller's
/// watermark stays put and the window is asked for again.
async fn collect_issue_pages<F, Fut>(mut fetch_page: F) -> Result<Vec<IssueUpdate>, LinearError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<IssuesPage, LinearError>>,
{
    let mut results = Vec::new();
    let mut after: Option<String> = None;

    for _ in 0..MAX_ISSUE_PAGES {
        let page = fetch_page(after.take()).await?;
        results.extend(page.nodes.into_iter().map(IssueUpdate::from));

        match page.page_info.end_cursor {
            Some(cursor) if page.page_info.has_next_page => after = Some(cursor),
            _ => return Ok(results),
        }
    }

    Err(LinearError::PageLimit(MAX_ISSUE_PAGES))
}

#[async_trait]
impl IssueTracker for LinearClient {
    async fn create_issue(
        &self,
        team_id: &str,
        title: &str,
        description: &str,
        label_ids: &[String],
    ) -> Result<LinearIssue, LinearError> {
        LinearClient::create_issue(self, team_id, title, description, label_ids).await
    }

    async fn updated_issues(
        &self,
        team_id: &str,
        since: &str,
    ) -> Result<Vec<IssueUpdate>, LinearError> {
        self.get_updated_issues(team_id, since).await
    }

    async fn upload_attachment(&self, url: &str, filename: &str) -> Result<String, LinearError> {
        self.upload_from_url(url, filename).await
    }
}
