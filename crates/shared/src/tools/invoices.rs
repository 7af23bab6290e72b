use serde_json::Value;
use tracing::debug;

use super::args::{CreateInvoiceArgs, GetInvoiceDetailsArgs, GetTotalInvoicesArgs, UpdateInvoiceArgs};
use super::output::{InvoiceResult, InvoiceSummary, ToolOutput};
use super::{
    RegistryError, Tool, ToolContext, ToolError, ToolFuture, ToolRegistry, parameters_schema_for,
    parse_arguments,
};
use crate::data_source::DataSourceResolver;
use crate::records::{InvoicePatch, InvoiceStatusFilter, NewInvoice};
use crate::stream::render::format_currency;

/// Registry holding the four invoice tools, all backed by `resolver`.
pub fn invoice_registry(resolver: DataSourceResolver) -> Result<ToolRegistry, RegistryError> {
    let mut registry = ToolRegistry::new();
    registry.register(GetInvoiceDetailsTool::new(resolver.clone()))?;
    registry.register(CreateInvoiceTool::new(resolver.clone()))?;
    registry.register(UpdateInvoiceTool::new(resolver.clone()))?;
    registry.register(GetTotalInvoicesTool::new(resolver))?;
    Ok(registry)
}

pub struct GetInvoiceDetailsTool {
    resolver: DataSourceResolver,
}

impl GetInvoiceDetailsTool {
    pub const NAME: &'static str = "getInvoiceDetails";

    pub fn new(resolver: DataSourceResolver) -> Self {
        Self { resolver }
    }
}

impl Tool for GetInvoiceDetailsTool {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "Get the details of one invoice, including its line items."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema_for::<GetInvoiceDetailsArgs>()
    }

    fn execute<'a>(&'a self, arguments: Value, ctx: ToolContext) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: GetInvoiceDetailsArgs = parse_arguments(Self::NAME, arguments.clone())?;
            let invoice = ctx
                .guard(self.resolver.get_invoice(&args.invoice_id))
                .await?
                .map_err(|err| ToolError::execution(Self::NAME, &arguments, err.to_string()))?;

            Ok(ToolOutput::InvoiceDetail(InvoiceResult::from(invoice)))
        })
    }
}

pub struct CreateInvoiceTool {
    resolver: DataSourceResolver,
}

impl CreateInvoiceTool {
    pub const NAME: &'static str = "createInvoice";

    pub fn new(resolver: DataSourceResolver) -> Self {
        Self { resolver }
    }
}

impl Tool for CreateInvoiceTool {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "Create a new invoice for a customer."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema_for::<CreateInvoiceArgs>()
    }

    fn execute<'a>(&'a self, arguments: Value, ctx: ToolContext) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: CreateInvoiceArgs = parse_arguments(Self::NAME, arguments)?;
            let new_invoice = NewInvoice {
                customer: args.customer.trim().to_string(),
                amount: args.amount,
                status: args.status,
                items: args.items.unwrap_or_default(),
                date: None,
            };

            let created = ctx.guard(self.resolver.create_invoice(new_invoice)).await?;
            debug!(
                invoice_id = %created.value.id,
                data_source = %created.data_source,
                "invoice created"
            );
            Ok(ToolOutput::Invoice(InvoiceResult::from(created)))
        })
    }
}

pub struct UpdateInvoiceTool {
    resolver: DataSourceResolver,
}

impl UpdateInvoiceTool {
    pub const NAME: &'static str = "updateInvoice";

    pub fn new(resolver: DataSourceResolver) -> Self {
        Self { resolver }
    }
}

impl Tool for UpdateInvoiceTool {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "Update the status, amount or line items of an existing invoice."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema_for::<UpdateInvoiceArgs>()
    }

    fn execute<'a>(&'a self, arguments: Value, ctx: ToolContext) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: UpdateInvoiceArgs = parse_arguments(Self::NAME, arguments.clone())?;
            let patch = InvoicePatch {
                customer: None,
                status: args.status,
                amount: args.amount,
                items: args.items,
            };
            if patch.is_empty() {
                return Err(ToolError::execution(
                    Self::NAME,
                    &arguments,
                    "No fields to update",
                ));
            }

            let updated = ctx
                .guard(self.resolver.update_invoice(&args.invoice_id, &patch))
                .await?
                .map_err(|err| ToolError::execution(Self::NAME, &arguments, err.to_string()))?;

            Ok(ToolOutput::Invoice(InvoiceResult::from(updated)))
        })
    }
}

pub struct GetTotalInvoicesTool {
    resolver: DataSourceResolver,
}

impl GetTotalInvoicesTool {
    pub const NAME: &'static str = "getTotalInvoices";

    pub fn new(resolver: DataSourceResolver) -> Self {
        Self { resolver }
    }
}

impl Tool for GetTotalInvoicesTool {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "Count invoices and sum their value, optionally restricted to one status."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema_for::<GetTotalInvoicesArgs>()
    }

    fn execute<'a>(&'a self, arguments: Value, ctx: ToolContext) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: GetTotalInvoicesArgs = parse_arguments(Self::NAME, arguments)?;
            let listed = ctx.guard(self.resolver.list_invoices(args.status)).await?;

            let count = listed.value.len();
            let total = listed.value.iter().map(|invoice| invoice.amount).sum::<f64>();
            Ok(ToolOutput::InvoiceSummary(InvoiceSummary {
                status: args.status,
                count,
                total,
                formatted: summary_sentence(args.status, count, total),
                invoices: listed.value,
                data_source: listed.data_source,
            }))
        })
    }
}

fn summary_sentence(filter: InvoiceStatusFilter, count: usize, total: f64) -> String {
    let qualifier = match filter.status() {
        Some(status) => status.as_str(),
        None => "total",
    };
    let (verb, noun) = if count == 1 {
        ("is", "invoice")
    } else {
        ("are", "invoices")
    };

    format!(
        "There {verb} {count} {qualifier} {noun} with a total value of {}.",
        format_currency(total)
    )
}
