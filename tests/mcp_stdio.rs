use std::{path::PathBuf, time::Duration};

use rmcp::{
    ServiceExt,
    model::{CallToolRequestParams, CallToolResult},
    service::{Peer, RoleClient},
    transport::{ConfigureCommandExt, TokioChildProcess},
};
use serde_json::{Value, json};

async fn call(
    peer: &Peer<RoleClient>,
    name: &'static str,
    args: Value,
) -> Result<CallToolResult, Box<dyn std::error::Error>> {
    Ok(peer
        .call_tool(CallToolRequestParams::new(name).with_arguments(args.as_object().unwrap().clone()))
        .await?)
}

#[tokio::test]
async fn mcp_stdio_index_and_search_roundtrip()
-> Result<(), Box<dyn std::error::Error>> {
    let tempdir = tempfile::tempdir()?;

    let bin = jsondex_bin()?;
    let transport = TokioChildProcess::new(
        tokio::process::Command::new(bin).configure(|cmd| {
            cmd.arg("serve").env("JSONDEX_DATA_DIR", tempdir.path());
        }),
    )?;

    let client = ().serve(transport).await?;
    let peer = client.peer();

    let added = call(
        peer,
        "jsondex_add_document",
        json!({
            "collection": "notes",
            "document": {"id": "hello", "type": "note", "text": "Hello world"}
        }),
    )
    .await?;
    assert_eq!(added.is_error, Some(false));

    let created = call(
        peer,
        "jsondex_create_checkpoint",
        json!({"collection": "notes", "commit": true}),
    )
    .await?;
    let checkid = created
        .structured_content
        .as_ref()
        .and_then(|v| v.get("checkid"))
        .and_then(|v| v.as_str())
        .expect("checkpoint id")
        .to_string();

    let mut reached = false;
    for _ in 0..200 {
        let checkpoint = call(
            peer,
            "jsondex_get_checkpoint",
            json!({"collection": "notes", "id": checkid}),
        )
        .await?;
        let structured = checkpoint.structured_content.expect("structured content");
        if structured.get("reached") == Some(&json!(true)) {
            assert_eq!(structured["errors"], json!([]));
            reached = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(reached, "checkpoint never reached");

    let result = call(
        peer,
        "jsondex_search",
        json!({"collection": "notes", "text": "hello"}),
    )
    .await?;
    let structured = result.structured_content.expect("structured content");
    let items = structured
        .get("items")
        .and_then(|v| v.as_array())
        .expect("items array");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].get("doc_type").and_then(|v| v.as_str()), Some("note"));
    assert_eq!(items[0].get("doc_id").and_then(|v| v.as_str()), Some("hello"));

    let doc = call(
        peer,
        "jsondex_get_document",
        json!({"collection": "notes", "doc_type": "note", "doc_id": "hello"}),
    )
    .await?;
    let structured = doc.structured_content.expect("structured content");
    assert_eq!(structured["data"]["text"], json!(["Hello world"]));

    client.cancel().await?;
    Ok(())
}

fn jsondex_bin() -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Ok(bin) = std::env::var("CARGO_BIN_EXE_jsondex") {
        return Ok(PathBuf::from(bin));
    }

    let mut path = std::env::current_exe()?;
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push("jsondex");

    if cfg!(windows) {
        path.set_extension("exe");
    }

    Ok(path)
}
