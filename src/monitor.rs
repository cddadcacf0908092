use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

use crate::config::MonitorConfig;
use crate::currency;
use crate::currency::CurrencyConverter;
use crate::models::Product;
use crate::scraper::CatalogScraper;
use crate::storage::ProductStore;
use crate::telegram::TelegramBot;
use crate::utils::error::WatcherError;
use crate::Result;

const SCRAPE_ERROR_TEXT: &str =
    "⚠️ <b>Помилка моніторингу</b>\n\nНе вдалося перевірити сайт Medicube. Перевірте логи.";
const EMPTY_SCRAPE_TEXT: &str = "⚠️ <b>Увага!</b>\n\nНе знайдено жодного товару на сайті Medicube. \
                                 Можливо, сайт недоступний або змінив структуру.";

/// Outcome of one check cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckReport {
    pub total: usize,
    pub new_count: usize,
    pub baseline: bool,
}

/// Drives one check cycle (scrape → diff → enrich → notify → persist) and
/// the continuous schedule around it.
pub struct Monitor {
    scraper: CatalogScraper,
    store: ProductStore,
    bot: TelegramBot,
    converter: CurrencyConverter,
    config: MonitorConfig,
}

impl Monitor {
    pub fn new(
        scraper: CatalogScraper,
        store: ProductStore,
        bot: TelegramBot,
        converter: CurrencyConverter,
        config: MonitorConfig,
    ) -> Self {
        Self {
            scraper,
            store,
            bot,
            converter,
            config,
        }
    }

    /// Run a single check cycle.
    ///
    /// On the first ever run the scrape becomes the baseline: everything is
    /// persisted with `first_seen` set and no per-item alerts go out. With
    /// `silent_baseline` false (forced check) the summary is still sent.
    pub async fn run_check(&mut self, silent_baseline: bool) -> Result<CheckReport> {
        info!("Starting product check...");
        let is_first = self.store.is_first_run();

        let current = match self.scraper.scrape_all().await {
            Ok(products) => products,
            Err(e) => {
                error!("Scraping failed: {e}");
                self.bot.broadcast(SCRAPE_ERROR_TEXT).await;
                return Ok(CheckReport {
                    total: 0,
                    new_count: 0,
                    baseline: is_first,
                });
            }
        };

        // An empty scrape means a broken site or layout, not an emptied
        // catalog; never diff or persist from it.
        if current.is_empty() {
            warn!("No products found! The website might be down or changed.");
            self.bot.broadcast(EMPTY_SCRAPE_TEXT).await;
            return Ok(CheckReport {
                total: 0,
                new_count: 0,
                baseline: is_first,
            });
        }

        let total = current.len();
        info!("Found {total} products on the website");

        if is_first {
            info!("First run - saving all products as baseline (no notifications)");
            self.store.update_products(&current)?;
            self.store.log_check(total, 0, None)?;

            if !silent_baseline {
                self.bot.send_summary(0, total).await;
            }

            info!("Baseline saved: {total} products");
            return Ok(CheckReport {
                total,
                new_count: 0,
                baseline: true,
            });
        }

        let new_products = self.store.find_new(&current)?;
        let new_count = new_products.len();
        info!("New products found: {new_count}");

        if new_count > 0 {
            let rate = self.converter.resolve_rate().await;

            let mut new_sorted: Vec<&Product> = new_products.values().collect();
            new_sorted.sort_by_key(|p| p.numeric_id());

            for product in new_sorted {
                info!("  NEW: #{} - {}", product.product_no, product.name);
                let price_uah = currency::convert_price(&product.price, rate);
                self.bot.send_new_product_alert(product, price_uah.as_deref()).await;
                sleep(Duration::from_millis(self.config.alert_delay_ms)).await;
            }

            self.bot.send_summary(new_count, total).await;
        }

        let new_ids = if new_count > 0 {
            let mut ids: Vec<String> = new_products.keys().cloned().collect();
            ids.sort_by_key(|id| id.parse::<u64>().unwrap_or(u64::MAX));
            Some(ids)
        } else {
            None
        };

        self.store.update_products(&current)?;
        self.store.log_check(total, new_count, new_ids)?;

        info!("Check complete. {new_count} new products, {total} total.");
        Ok(CheckReport {
            total,
            new_count,
            baseline: false,
        })
    }

    /// Run checks forever at the given interval.
    ///
    /// The wait between cycles sleeps in short increments and watches the
    /// shutdown flag set by Ctrl-C, so a stop request takes effect within
    /// one increment. A cycle already in progress always completes.
    pub async fn run_daemon(&mut self) -> Result<()> {
        let interval_hours = self.config.interval_hours;
        let interval = Duration::from_secs_f64(interval_hours * 3600.0);
        info!("Starting daemon mode (check every {interval_hours}h)");

        let shutdown = Arc::new(AtomicBool::new(false));
        {
            let shutdown = Arc::clone(&shutdown);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Shutdown signal received. Exiting...");
                    shutdown.store(true, Ordering::SeqCst);
                }
            });
        }

        self.run_cycle().await;

        while !shutdown.load(Ordering::SeqCst) {
            let deadline = Instant::now() + interval;
            info!("Next check in {interval_hours}h");

            while !shutdown.load(Ordering::SeqCst) {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                let poll = Duration::from_secs(self.config.shutdown_poll_secs.max(1));
                sleep(poll.min(deadline - now)).await;
            }

            if !shutdown.load(Ordering::SeqCst) {
                self.run_cycle().await;
            }
        }

        info!("Monitor stopped.");
        Ok(())
    }

    /// One contained cycle: an escaping error is logged and reported
    /// best-effort, and the schedule carries on.
    async fn run_cycle(&mut self) {
        if let Err(e) = self.run_check(true).await {
            error!("Check failed: {e}");
            let text = format!(
                "⚠️ <b>Помилка моніторингу</b>\n\nСталася помилка: {}",
                truncate(&e.to_string(), 200)
            );
            self.bot.broadcast(&text).await;
        }
    }

    /// Interactive setup: verify the token, discover subscribers, persist
    /// them, send a confirmation, then run an initial non-silent check.
    pub async fn run_setup(&mut self) -> Result<()> {
        println!("\n{}", "=".repeat(50));
        println!("  Medicube Monitor - Setup");
        println!("{}", "=".repeat(50));

        println!("\n1. Verifying bot token...");
        if !self.bot.verify().await {
            println!("   ERROR: Bot token is invalid!");
            return Err(WatcherError::Telegram("bot token is invalid".to_string()));
        }
        println!("   OK - Bot is valid");

        println!("\n2. Discovering chat IDs...");
        println!("   Make sure you have sent /start to the bot first!");

        let discovered = self.bot.discover_chat_ids().await;
        let mut all_ids = self.store.chat_ids();
        for id in discovered {
            if !all_ids.contains(&id) {
                all_ids.push(id);
            }
        }

        if all_ids.is_empty() {
            println!("\n   No chat IDs found!");
            println!("   Please send /start to the bot and run setup again.");
            print!("   Or enter a chat ID manually (leave empty to skip): ");
            io::stdout().flush()?;

            let mut manual = String::new();
            io::stdin().read_line(&mut manual)?;
            let manual = manual.trim();
            if manual.is_empty() {
                println!("   Setup incomplete - no chat IDs configured.");
                return Ok(());
            }
            all_ids.push(manual.to_string());
        }

        self.store.save_chat_ids(&all_ids)?;
        self.bot.chat_ids = self.store.chat_ids();
        println!(
            "   Found {} chat(s): {}",
            self.bot.chat_ids.len(),
            self.bot.chat_ids.join(", ")
        );

        println!("\n3. Sending confirmation message...");
        let sent = self.bot.send_startup_message().await;
        println!("   Sent to {sent}/{} chats", self.bot.chat_ids.len());

        println!("\n4. Running initial product scan...");
        self.run_check(false).await?;

        println!("\n{}", "=".repeat(50));
        println!("  Setup complete!");
        println!("  Run with --daemon to start continuous monitoring");
        println!("{}\n", "=".repeat(50));
        Ok(())
    }

    /// Print ledger size and the most recent check.
    pub fn print_status(&self) -> Result<()> {
        let products = self.store.load_products()?;
        println!("Known products: {}", products.len());

        match self.store.last_check() {
            Some(entry) => {
                println!("Last check:     {}", entry.timestamp.to_rfc3339());
                println!("  total: {}, new: {}", entry.total_products, entry.new_count);
                if let Some(ids) = entry.new_product_ids {
                    println!("  new ids: {}", ids.join(", "));
                }
            }
            None => println!("Last check:     never"),
        }

        println!("Subscribers:    {}", self.store.chat_ids().len());
        Ok(())
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("помилка", 4), "поми");
        assert_eq!(truncate("short", 200), "short");
    }
}
