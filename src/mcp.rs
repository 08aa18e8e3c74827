use std::sync::Arc;

use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult,
        Content,
        Implementation,
        ServerCapabilities,
        ServerInfo,
    },
    tool,
    tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    app::{App, CompanyInfo},
    error,
    search::{self, DEFAULT_TOP_K, SearchOutcome, SearchRequest},
};

#[derive(Clone)]
pub struct BrsrMcpServer {
    app: Arc<App>,
    tool_router: ToolRouter<Self>,
}

impl BrsrMcpServer {
    pub fn new(app: App) -> Self {
        Self {
            app: Arc::new(app),
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router(router = tool_router)]
impl BrsrMcpServer {
    /// Semantic search over indexed report chunks.
    #[tool(
        name = "brsr_search",
        description = "Search sustainability report chunks. A company name (fuzzy matched) biases ranking toward that company's reports and a year biases it toward that reporting period; neither removes other results."
    )]
    pub async fn brsr_search(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let mut request = SearchRequest::new(params.query.clone())
            .top_k(params.count.unwrap_or(DEFAULT_TOP_K));
        if let Some(company) = params.company {
            request = request.company(company);
        }
        if let Some(year) = params.year {
            request = request.year(year);
        }

        let outcome = self
            .app
            .search(&request)
            .map_err(|e| mcp_error("search failed", e))?;

        let summary = search::render_human(&outcome);
        let structured = serde_json::to_value(SearchResponse {
            query: &params.query,
            result_count: outcome.results().len(),
            outcome: &outcome,
        })
        .map_err(|e| mcp_error("failed to serialize search results", e))?;

        Ok(tool_result(summary, structured))
    }

    /// List every company with reports in the metadata table.
    #[tool(
        name = "brsr_companies",
        description = "List the canonical names of all companies that have reports."
    )]
    pub async fn brsr_companies(
        &self,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let companies = self
            .app
            .companies()
            .map_err(|e| mcp_error("failed to list companies", e))?;

        let summary = if companies.is_empty() {
            "No companies in the metadata table.".to_string()
        } else {
            companies.join("\n")
        };
        let structured = json!({
            "count": companies.len(),
            "companies": companies,
        });

        Ok(tool_result(summary, structured))
    }

    /// Resolve a possibly misspelled company name.
    #[tool(
        name = "brsr_company_info",
        description = "Resolve a company name (misspellings and abbreviations are fine) and list the years it has reports for."
    )]
    pub async fn brsr_company_info(
        &self,
        params: Parameters<CompanyInfoParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let info = self
            .app
            .company_info(&params.0.name)
            .map_err(|e| mcp_error("company lookup failed", e))?;

        let summary = match &info {
            CompanyInfo::Found {
                company,
                similarity,
                years,
            } => format!(
                "{company} (similarity {similarity:.3})\nYears: {}",
                years.join(", ")
            ),
            CompanyInfo::NotFound { message } => message.clone(),
        };
        let structured = serde_json::to_value(&info)
            .map_err(|e| mcp_error("failed to serialize company info", e))?;

        Ok(tool_result(summary, structured))
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for BrsrMcpServer {
    fn get_info(&self) -> ServerInfo {
        let mut server_info = Implementation::new("brsr-search", env!("CARGO_PKG_VERSION"));
        server_info.title = Some("BRSR report search".to_string());
        let mut info = ServerInfo::new(ServerCapabilities::builder().enable_tools().build());
        info.server_info = server_info;
        info.instructions = Some(
            "Use brsr_company_info to check a company name, then brsr_search with that company to find passages in its sustainability reports."
                .to_string(),
        );
        info
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    /// What to look for.
    pub query: String,
    /// Company name; fuzzy matched and used as a ranking hint.
    pub company: Option<String>,
    /// Reporting year, e.g. "2023".
    pub year: Option<String>,
    /// Number of results (default: 5).
    pub count: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CompanyInfoParams {
    /// Company name to resolve.
    pub name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse<'a> {
    query: &'a str,
    result_count: usize,
    #[serde(flatten)]
    outcome: &'a SearchOutcome,
}

fn tool_result(summary: String, structured: serde_json::Value) -> CallToolResult {
    let mut result = CallToolResult::success(vec![Content::text(summary)]);
    result.structured_content = Some(structured);
    result
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

pub fn run_mcp(app: App) -> error::Result<()> {
    let server = BrsrMcpServer::new(app);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            error::Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    runtime.block_on(async move {
        let transport = rmcp::transport::stdio();
        let running = server.serve(transport).await.map_err(|e| {
            error::Error::Config(format!(
                "MCP server initialization failed: {e}"
            ))
        })?;
        running.waiting().await.map_err(|e| {
            error::Error::Config(format!("MCP server error: {e}"))
        })?;
        Ok(())
    })
}
