//! Slack Block Kit payloads for scan and report messages.

use serde::{Deserialize, Serialize};

use crate::models::ScanRecord;

/// Action id of the button that opens the scan in AppScan.
pub const VIEW_SCAN_ACTION_ID: &str = "view_scan_report_button";

/// Action id of the button that requests a PDF report.
pub const GENERATE_REPORT_ACTION_ID: &str = "download_report_button";

/// Text of the placeholder posted while a report is generated.
pub const REPORT_WAIT_TEXT: &str =
    "Generating your AppScan PDF report, please wait... :hourglass_flowing_sand:";

/// Block Kit layout blocks.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Header {
        text: TextObject,
    },
    Section {
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<TextObject>,
        #[serde(skip_serializing_if = "Option::is_none")]
        fields: Option<Vec<TextObject>>,
    },
    Actions {
        elements: Vec<ButtonElement>,
    },
}

/// Block Kit text object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextObject {
    #[serde(rename = "type")]
    pub text_type: &'static str,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emoji: Option<bool>,
}

impl TextObject {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text_type: "plain_text",
            text: text.into(),
            emoji: Some(true),
        }
    }

    pub fn mrkdwn(text: impl Into<String>) -> Self {
        Self {
            text_type: "mrkdwn",
            text: text.into(),
            emoji: None,
        }
    }
}

/// Button inside an actions block. Either opens `url` or carries `value`
/// back in the interaction payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ButtonElement {
    #[serde(rename = "type")]
    pub element_type: &'static str,
    pub text: TextObject,
    pub action_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl ButtonElement {
    pub fn link(text: impl Into<String>, action_id: &str, url: impl Into<String>) -> Self {
        Self {
            element_type: "button",
            text: TextObject::plain(text),
            action_id: action_id.to_string(),
            url: Some(url.into()),
            value: None,
        }
    }

    pub fn with_value(text: impl Into<String>, action_id: &str, value: impl Into<String>) -> Self {
        Self {
            element_type: "button",
            text: TextObject::plain(text),
            action_id: action_id.to_string(),
            url: None,
            value: Some(value.into()),
        }
    }
}

/// Fallback text plus optional blocks, as accepted by `chat.postMessage`
/// and `chat.update`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MessageContent {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocks: Option<Vec<Block>>,
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            blocks: None,
        }
    }

    pub fn with_blocks(mut self, blocks: Vec<Block>) -> Self {
        self.blocks = Some(blocks);
        self
    }
}

/// Payload of the "Generate Report" button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    pub scan_id: String,
    pub scan_name: String,
}

fn field(label: &str, value: &str) -> TextObject {
    TextObject::mrkdwn(format!("*{}:*\n{}", label, value))
}

/// Blocks announcing a finished scan.
///
/// `appscan_base_url` is the console root used for the "View in AppScan" link.
pub fn scan_completion_blocks(scan: &ScanRecord, appscan_base_url: &str) -> Vec<Block> {
    let Some(execution) = scan.latest_execution.as_ref() else {
        return vec![Block::Section {
            text: Some(TextObject::mrkdwn(format!(
                "Scan {} has no execution data.",
                scan.id
            ))),
            fields: None,
        }];
    };

    let mut fields = vec![
        field("Application", &scan.app_name),
        field("Scan Name", &scan.name),
        field("Technology", scan.technology.as_deref().unwrap_or("Unknown")),
    ];
    if let Some(created_by) = &scan.created_by {
        fields.push(field("Created By", &created_by.full_name()));
        if let Some(user_name) = &created_by.user_name {
            fields.push(field("User Name", user_name));
        }
        if let Some(email) = &created_by.email {
            fields.push(field("Email", email));
        }
    }
    // Only the date part of the timestamp.
    if let Some(date) = scan.created_at.as_deref().and_then(|c| c.get(..10)) {
        fields.push(field("Created At", date));
    }

    let breakdown = format!(
        "*Issue Summary:*\n:bell: *Total:* {} \n :black_circle: *Critical:* {} | :red_circle: *High:* {} | :large_orange_circle: *Medium:* {} | :large_blue_circle: *Low:* {} | :white_circle: *Info:* {}",
        execution.issues_found,
        execution.critical_issues,
        execution.high_issues,
        execution.medium_issues,
        execution.low_issues,
        execution.info_issues,
    );

    let request = ReportRequest {
        scan_id: scan.id.clone(),
        scan_name: scan.name.clone(),
    };
    let request_value = serde_json::to_string(&request).unwrap_or_default();

    vec![
        Block::Header {
            text: TextObject::plain(format!(
                "✅ Scan {} : {}",
                scan.status().unwrap_or("Ready"),
                scan.name
            )),
        },
        Block::Section {
            text: None,
            fields: Some(fields),
        },
        Block::Section {
            text: Some(TextObject::mrkdwn(breakdown)),
            fields: None,
        },
        Block::Actions {
            elements: vec![
                ButtonElement::link(
                    "View in AppScan",
                    VIEW_SCAN_ACTION_ID,
                    format!("{}/main/scans/{}", appscan_base_url, scan.id),
                ),
                ButtonElement::with_value(
                    "Generate Report",
                    GENERATE_REPORT_ACTION_ID,
                    request_value,
                ),
            ],
        },
    ]
}

/// Full completion message with fallback text.
pub fn scan_completion_message(scan: &ScanRecord, appscan_base_url: &str) -> MessageContent {
    MessageContent::text(format!("Scan completed for {}", scan.app_name))
        .with_blocks(scan_completion_blocks(scan, appscan_base_url))
}

/// Message replacing the placeholder once the report is downloadable.
pub fn report_ready_message(download_link: &str) -> MessageContent {
    MessageContent::text("Your AppScan PDF report is ready.").with_blocks(vec![Block::Section {
        text: Some(TextObject::mrkdwn(format!(
            "*Your AppScan PDF report is ready.*\n<{}|Download Report>",
            download_link
        ))),
        fields: None,
    }])
}

/// Message replacing the placeholder when report generation failed.
pub fn report_failed_message(scan_id: &str, reason: &str) -> MessageContent {
    MessageContent::text(format!(
        "Failed to generate the report download link for scan {}. Reason: {}",
        scan_id, reason
    ))
}
