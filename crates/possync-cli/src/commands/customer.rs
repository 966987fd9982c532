//! Customer command - Look up synced customers in the local database
//!
//! `possync customer --remote-id N` prints one customer by platform id;
//! `possync customer --phone P` lists every customer sharing that phone.

use anyhow::{Context, Result};
use clap::Args;
use possync_core::domain::{RemoteCustomerId, StoredCustomer};
use possync_core::ports::IRecordStore;

use crate::context::CliContext;
use crate::output::{format_time, OutputFormatter};

#[derive(Debug, Args)]
#[command(group(
    clap::ArgGroup::new("key")
        .required(true)
        .args(["remote_id", "phone"])
))]
pub struct CustomerCommand {
    /// Loyalty platform customer id
    #[arg(long)]
    pub remote_id: Option<RemoteCustomerId>,

    /// Phone number as stored by the platform
    #[arg(long)]
    pub phone: Option<String>,
}

impl CustomerCommand {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let formatter = ctx.formatter();

        let Some(store) = ctx.open_existing_store().await? else {
            formatter.error(&format!(
                "No database at {}. Run 'possync sync' first.",
                ctx.db_path().display()
            ));
            return Ok(());
        };

        let customers = match (self.remote_id, self.phone.as_deref()) {
            (Some(id), _) => store
                .get_customer(id)
                .await
                .context("Failed to read customer")?
                .into_iter()
                .collect(),
            (None, Some(phone)) => store
                .find_customers_by_phone(phone.trim())
                .await
                .context("Failed to search customers")?,
            (None, None) => Vec::new(),
        };

        if ctx.format.is_json() {
            formatter.print_json(&serde_json::to_value(&customers)?);
            return Ok(());
        }

        if customers.is_empty() {
            formatter.warn("No matching customer");
            return Ok(());
        }
        for customer in &customers {
            print_customer(&*formatter, customer);
        }
        Ok(())
    }
}

fn print_customer(formatter: &dyn OutputFormatter, stored: &StoredCustomer) {
    let c = &stored.record;
    formatter.success(&format!("{} (remote id {})", c.display_name(), c.remote_id));
    formatter.info(&format!("Phone:          {}", c.phone));
    if !c.email.is_empty() {
        formatter.info(&format!("Email:          {}", c.email));
    }
    let tier = if c.has_membership() {
        c.tier_label.as_str()
    } else {
        "-"
    };
    formatter.info(&format!("Tier:           {tier}"));
    formatter.info(&format!(
        "Points:         {} (used {}, total {})",
        c.points, c.used_points, c.total_points
    ));
    formatter.info(&format!("Total spending: {}", c.total_spending));
    formatter.info(&format!("Remote update:  {}", format_time(c.remote_updated_at)));
    formatter.info(&format!(
        "Synced:         first {}, last {}",
        format_time(Some(stored.first_synced_at)),
        format_time(Some(stored.last_synced_at))
    ));
}
