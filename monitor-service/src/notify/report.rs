use std::fmt::Write as _;

use energy_client::domain::Bill;

/// Rendered daily bill for the email and push channels.
#[derive(Debug, Clone, PartialEq)]
pub struct BillReport {
    pub subject: String,
    pub html: String,
    pub push_title: String,
    pub push_body: String,
}

impl BillReport {
    pub fn render(bill: &Bill, currency: &str) -> Self {
        let subject = format!("Daily Energy Report - {}", bill.bill_date);

        let mut rows = String::new();
        for charge in bill.cost_breakdown.iter() {
            let _ = write!(
                rows,
                "<tr><td>{:.3}</td><td>{currency}{:.2}</td><td>{currency}{:.2}</td></tr>",
                charge.units, charge.rate, charge.cost
            );
        }

        let html = format!(
            "<html>\n  <body>\n    <h2>Daily Energy Consumption</h2>\n    \
             <p><b>Total Energy Used:</b> {energy:.3} kWh</p>\n    \
             <p><b>Total Cost:</b> {currency}{cost:.2}</p>\n    \
             <p><b>Carbon Emission:</b> {co2:.3} kg CO\u{2082}</p>\n    \
             <h3>Cost Breakdown</h3>\n    \
             <table border=\"1\" cellpadding=\"5\">\n      \
             <tr><th>Units</th><th>Rate</th><th>Cost</th></tr>\n      {rows}\n    </table>\n  \
             </body>\n</html>\n",
            energy = bill.total_energy_kwh,
            cost = bill.total_cost,
            co2 = bill.co2_emission_kg,
        );

        let push_body = format!(
            "{:.3} kWh used, {currency}{:.2}, {:.3} kg CO\u{2082}",
            bill.total_energy_kwh, bill.total_cost, bill.co2_emission_kg
        );

        Self {
            subject,
            html,
            push_title: format!("Energy bill for {}", bill.bill_date),
            push_body,
        }
    }
}
