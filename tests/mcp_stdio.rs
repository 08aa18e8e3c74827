use std::path::{Path, PathBuf};

use rmcp::{
    ServiceExt,
    model::CallToolRequestParams,
    transport::{ConfigureCommandExt, TokioChildProcess},
};
use serde_json::json;

fn write_metadata(dir: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let path = dir.join("metadata.csv");
    std::fs::write(
        &path,
        "COMPANY,FROM YEAR,TO YEAR,ATTACHMENT\n\
         Acme Corp,2022,2023,https://example.com/acme.pdf\n\
         Acme Corp,2023,2024,https://example.com/acme-2024.pdf\n\
         Globex Industries,2021,2022,https://example.com/globex.pdf\n",
    )?;
    Ok(path)
}

fn call(
    name: &str,
    args: serde_json::Value,
) -> CallToolRequestParams {
    let mut params = CallToolRequestParams::new(name.to_string());
    params.arguments = args.as_object().cloned();
    params
}

#[tokio::test]
async fn mcp_stdio_company_and_search_roundtrip()
-> Result<(), Box<dyn std::error::Error>> {
    let tempdir = tempfile::tempdir()?;
    let metadata = write_metadata(tempdir.path())?;
    let data_dir = tempdir.path().join("data");

    let bin = brsr_bin()?;
    let transport = TokioChildProcess::new(
        tokio::process::Command::new(bin).configure(|cmd| {
            cmd.arg("mcp")
                .env("BRSR_DATA_DIR", &data_dir)
                .env("BRSR_METADATA", &metadata)
                .env("BRSR_BACKEND", "offline")
                .env("BRSR_LOG", "warn");
        }),
    )?;

    let client = ().serve(transport).await?;

    let companies = client
        .peer()
        .call_tool(call("brsr_companies", json!({})))
        .await?;
    let structured = companies.structured_content.expect("structured content");
    let names: Vec<&str> = structured
        .get("companies")
        .and_then(|v| v.as_array())
        .expect("companies array")
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    assert_eq!(names, vec!["Acme Corp", "Globex Industries"]);

    let info = client
        .peer()
        .call_tool(call("brsr_company_info", json!({ "name": "Acme" })))
        .await?;
    let structured = info.structured_content.expect("structured content");
    assert_eq!(
        structured.get("company").and_then(|v| v.as_str()),
        Some("Acme Corp")
    );
    let years: Vec<&str> = structured
        .get("years")
        .and_then(|v| v.as_array())
        .expect("years array")
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    assert_eq!(years, vec!["2022", "2023", "2024"]);

    let search = client
        .peer()
        .call_tool(call(
            "brsr_search",
            json!({ "query": "water withdrawal", "company": "Globex", "count": 3 }),
        ))
        .await?;
    let structured = search.structured_content.expect("structured content");
    assert_eq!(
        structured.get("status").and_then(|v| v.as_str()),
        Some("no_results")
    );
    assert_eq!(
        structured.get("resultCount").and_then(|v| v.as_u64()),
        Some(0)
    );

    client.cancel().await?;
    Ok(())
}

fn brsr_bin() -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Some(bin) = option_env!("CARGO_BIN_EXE_brsr-search") {
        return Ok(PathBuf::from(bin));
    }

    let mut path = std::env::current_exe()?;
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push("brsr-search");

    if cfg!(windows) {
        path.set_extension("exe");
    }

    Ok(path)
}
