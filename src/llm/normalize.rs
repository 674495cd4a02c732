//! Conversation → backend message shapes.
//!
//! Images pair with user turns in arrival order: the first user turn gets
//! the first image, the second the second, and so on. Once images run out,
//! the remaining user turns are text-only. A user turn whose text is exactly
//! the image placeholder sends only its image.

use serde_json::{json, Value};

use crate::llm::types::{
    ChatMessage, ContentPart, ConversationTurn, ImageAttachment, ImageUrl, MessageContent, Role,
};

/// Chat-completions messages: `human` → `user`, `ai` → `assistant`, `system` as-is.
pub fn to_chat_messages(
    conversations: &[ConversationTurn],
    images: &[ImageAttachment],
) -> Vec<ChatMessage> {
    let mut remaining = images.iter();
    conversations
        .iter()
        .map(|turn| {
            let role = match turn.role {
                Role::Human => "user",
                Role::Ai => "assistant",
                Role::System => "system",
            };
            if turn.role != Role::Human {
                return ChatMessage {
                    role: role.into(),
                    content: MessageContent::Text(turn.content.clone()),
                };
            }
            match remaining.next() {
                Some(image) => {
                    let mut parts = Vec::with_capacity(2);
                    if !turn.is_image_placeholder() {
                        parts.push(ContentPart::Text {
                            text: turn.content.clone(),
                        });
                    }
                    parts.push(ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: image.as_str().to_string(),
                        },
                    });
                    ChatMessage {
                        role: role.into(),
                        content: MessageContent::Parts(parts),
                    }
                }
                None => ChatMessage {
                    role: role.into(),
                    content: MessageContent::Text(turn.content.clone()),
                },
            }
        })
        .collect()
}

/// Index of the last assistant message, if any.
pub fn last_assistant_index(messages: &[ChatMessage]) -> Option<usize> {
    messages.iter().rposition(|m| m.role == "assistant")
}

/// Index of the first message that carries an image, if any.
pub fn head_image_index(messages: &[ChatMessage]) -> Option<usize> {
    messages.iter().position(ChatMessage::has_image)
}

/// One responses-API input item per chat message.
pub fn to_responses_input(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|msg| {
            let text_type = if msg.role == "assistant" {
                "output_text"
            } else {
                "input_text"
            };
            let content: Vec<Value> = match &msg.content {
                MessageContent::Text(text) => vec![json!({ "type": text_type, "text": text })],
                MessageContent::Parts(parts) => parts
                    .iter()
                    .map(|part| match part {
                        ContentPart::Text { text } => json!({ "type": text_type, "text": text }),
                        ContentPart::ImageUrl { image_url } => {
                            json!({ "type": "input_image", "image_url": image_url.url })
                        }
                    })
                    .collect(),
            };
            json!({ "role": msg.role, "content": content })
        })
        .collect()
}

/// Whether a responses-API input item carries an image.
pub fn input_has_image(input: &Value) -> bool {
    input["content"]
        .as_array()
        .map(|parts| parts.iter().any(|p| p["type"] == "input_image"))
        .unwrap_or(false)
}

/// Messages-API payload: system turns are lifted into a single top-level
/// prompt, the rest become `user`/`assistant` messages with content blocks.
pub fn to_anthropic_messages(
    conversations: &[ConversationTurn],
    images: &[ImageAttachment],
) -> (Option<String>, Vec<Value>) {
    let mut system_prompt: Option<String> = None;
    let mut messages = Vec::new();
    let mut image_index = 0;

    for turn in conversations {
        if turn.role == Role::System {
            system_prompt = Some(match system_prompt {
                Some(existing) => format!("{existing}\n{}", turn.content),
                None => turn.content.clone(),
            });
            continue;
        }

        let role = if turn.role == Role::Human {
            "user"
        } else {
            "assistant"
        };
        let mut content = Vec::with_capacity(2);
        let mut attached = false;

        if role == "user" {
            if let Some(image) = images.get(image_index) {
                // Non data-URI attachments cannot be inlined as base64 blocks.
                if image.is_data_uri() {
                    image_index += 1;
                    attached = true;
                    if !turn.is_image_placeholder() {
                        content.push(json!({ "type": "text", "text": turn.content }));
                    }
                    content.push(json!({
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": image.media_type(),
                            "data": image.base64_data(),
                        }
                    }));
                }
            }
        }
        if !attached {
            content.push(json!({ "type": "text", "text": turn.content }));
        }

        messages.push(json!({ "role": role, "content": content }));
    }

    (system_prompt, messages)
}

/// Plain-text chat messages for the local backend.
pub fn to_ollama_messages(conversations: &[ConversationTurn]) -> Vec<Value> {
    conversations
        .iter()
        .map(|turn| {
            let role = match turn.role {
                Role::Human => "user",
                Role::Ai => "assistant",
                Role::System => "system",
            };
            json!({ "role": role, "content": turn.content })
        })
        .collect()
}
