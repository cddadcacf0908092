use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::TelegramConfig;
use crate::models::Product;
use crate::Result;

const CATALOG_URL: &str = "https://m.themedicube.co.kr/";

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BotInfo {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    #[serde(default)]
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    chat: Chat,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
}

impl Chat {
    fn display_name(&self) -> String {
        if let Some(title) = &self.title {
            return title.clone();
        }
        let first = self.first_name.as_deref().unwrap_or("");
        let last = self.last_name.as_deref().unwrap_or("");
        format!("{first} {last}").trim().to_string()
    }
}

/// Telegram bot client for subscriber discovery and notification dispatch.
///
/// Send failures are logged and reported through return values, never
/// raised: one unreachable chat must not block delivery to the others.
pub struct TelegramBot {
    client: Client,
    api_url: String,
    pub chat_ids: Vec<String>,
}

impl TelegramBot {
    pub fn new(config: &TelegramConfig, chat_ids: Vec<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_url: format!("{}/bot{}", config.api_base.trim_end_matches('/'), config.token),
            chat_ids,
        })
    }

    /// Check that the bot token resolves to a bot identity.
    pub async fn verify(&self) -> bool {
        let url = format!("{}/getMe", self.api_url);
        let response = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                error!("Bot verification error: {e}");
                return false;
            }
        };

        match response.json::<ApiResponse<BotInfo>>().await {
            Ok(body) if body.ok => {
                if let Some(bot) = body.result {
                    info!(
                        "Bot verified: @{} ({})",
                        bot.username.as_deref().unwrap_or("?"),
                        bot.first_name.as_deref().unwrap_or("?")
                    );
                }
                true
            }
            Ok(body) => {
                error!(
                    "Bot verification failed: {}",
                    body.description.as_deref().unwrap_or("unknown error")
                );
                false
            }
            Err(e) => {
                error!("Bot verification error: {e}");
                false
            }
        }
    }

    /// Collect chat ids from pending inbound messages (subscribers send
    /// /start to the bot first). Deduplicated; errors degrade to empty.
    pub async fn discover_chat_ids(&self) -> Vec<String> {
        let url = format!("{}/getUpdates", self.api_url);
        let body = match self.client.get(&url).send().await {
            Ok(response) => match response.json::<ApiResponse<Vec<Update>>>().await {
                Ok(body) => body,
                Err(e) => {
                    error!("Error reading updates: {e}");
                    return Vec::new();
                }
            },
            Err(e) => {
                error!("Error discovering chat IDs: {e}");
                return Vec::new();
            }
        };

        if !body.ok {
            warn!(
                "Failed to get updates: {}",
                body.description.as_deref().unwrap_or("unknown error")
            );
            return Vec::new();
        }

        let mut discovered = BTreeSet::new();
        for update in body.result.unwrap_or_default() {
            if let Some(message) = update.message {
                let chat_id = message.chat.id.to_string();
                info!("Discovered chat: {chat_id} ({})", message.chat.display_name());
                discovered.insert(chat_id);
            }
        }

        discovered.into_iter().collect()
    }

    /// Send one HTML-formatted message. Returns false on any failure.
    pub async fn send_message(&self, chat_id: &str, text: &str, disable_preview: bool) -> bool {
        let url = format!("{}/sendMessage", self.api_url);
        let payload = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": disable_preview,
        });

        let response = match self.client.post(&url).json(&payload).send().await {
            Ok(r) => r,
            Err(e) => {
                error!("Error sending message to {chat_id}: {e}");
                return false;
            }
        };

        match response.json::<ApiResponse<serde_json::Value>>().await {
            Ok(body) if body.ok => true,
            Ok(body) => {
                error!(
                    "Failed to send message to {chat_id}: {}",
                    body.description.as_deref().unwrap_or("unknown error")
                );
                false
            }
            Err(e) => {
                error!("Error sending message to {chat_id}: {e}");
                false
            }
        }
    }

    /// Send a message to every known chat. One failing chat does not stop
    /// the rest; returns the number of successful sends.
    pub async fn broadcast(&self, text: &str) -> usize {
        let mut success = 0;
        for chat_id in &self.chat_ids {
            if self.send_message(chat_id, text, false).await {
                success += 1;
            }
        }
        success
    }

    pub async fn send_new_product_alert(&self, product: &Product, price_uah: Option<&str>) -> usize {
        self.broadcast(&render_new_product_alert(product, price_uah)).await
    }

    pub async fn send_summary(&self, new_count: usize, total_count: usize) -> usize {
        self.broadcast(&render_summary(new_count, total_count)).await
    }

    /// Registration confirmation sent at the end of setup.
    pub async fn send_startup_message(&self) -> usize {
        let text = format!(
            "🤖 <b>Medicube Monitor запущено!</b>\n\n\
             Бот буде перевіряти нові товари на \
             <a href=\"{CATALOG_URL}\">m.themedicube.co.kr</a> \
             та надсилати повідомлення про новинки.\n\n\
             Команди:\n\
             /start - Підписатися на оновлення\n\
             /check - Перевірити зараз\n\
             /status - Статус моніторингу"
        );
        self.broadcast(&text).await
    }
}

/// Format one new-product alert. Field order is fixed: name, price line,
/// category, id, detail link. Catalog-sourced text is escaped for HTML.
pub fn render_new_product_alert(product: &Product, price_uah: Option<&str>) -> String {
    let mut lines = vec![
        "🆕 <b>Новий товар на Medicube!</b>".to_string(),
        String::new(),
        format!("📦 <b>{}</b>", escape_html(&product.name)),
    ];

    let price_krw = product.price.trim();
    match (price_uah, price_krw.is_empty()) {
        (Some(uah), false) => {
            lines.push(format!(
                "💰 Ціна: <b>{}</b> ({})",
                escape_html(uah),
                escape_html(price_krw)
            ));
        }
        (Some(uah), true) => {
            lines.push(format!("💰 Ціна: <b>{}</b>", escape_html(uah)));
        }
        (None, false) => {
            lines.push(format!("💰 Ціна: {}", escape_html(price_krw)));
        }
        (None, true) => {}
    }

    if !product.category.is_empty() {
        lines.push(format!("📂 Категорія: {}", escape_html(&product.category)));
    }

    lines.push(format!("🔗 ID: #{}", product.product_no));

    if !product.url.is_empty() {
        lines.push(format!("\n<a href=\"{}\">👉 Перейти до товару</a>", product.url));
    }

    lines.join("\n")
}

/// One of two fixed summary templates, depending on whether anything new
/// was found.
pub fn render_summary(new_count: usize, total_count: usize) -> String {
    if new_count > 0 {
        format!(
            "📊 <b>Моніторинг Medicube завершено</b>\n\n\
             🆕 Нових товарів: <b>{new_count}</b>\n\
             📦 Всього товарів на сайті: <b>{total_count}</b>\n\n\
             🌐 <a href=\"{CATALOG_URL}\">Перейти на сайт</a>"
        )
    } else {
        format!(
            "📊 <b>Моніторинг Medicube завершено</b>\n\n\
             ✅ Нових товарів не знайдено\n\
             📦 Всього товарів на сайті: <b>{total_count}</b>"
        )
    }
}

/// Escape the three markup-significant characters for Telegram HTML mode.
fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
