use crate::models::AccountClass;
use crate::system_accounts::SystemAccountKey;

/// One account of a chart template; parents are referenced by code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateAccount {
    pub code: &'static str,
    pub name: &'static str,
    pub class: AccountClass,
    pub is_posting: bool,
    pub parent_code: Option<&'static str>,
}

pub trait ChartTemplate {
    fn name(&self) -> &'static str;
    /// Accounts in parent-before-child order.
    fn accounts(&self) -> Vec<TemplateAccount>;
    fn system_accounts(&self) -> Vec<(SystemAccountKey, &'static str)>;
    fn inventory_valuation_method(&self) -> &'static str;
}

/// Standard chart for a palm oil mill.
#[derive(Debug, Clone, Default)]
pub struct PksChartTemplate;

const fn header(
    code: &'static str,
    name: &'static str,
    class: AccountClass,
    parent_code: Option<&'static str>,
) -> TemplateAccount {
    TemplateAccount {
        code,
        name,
        class,
        is_posting: false,
        parent_code,
    }
}

const fn posting(
    code: &'static str,
    name: &'static str,
    class: AccountClass,
    parent_code: &'static str,
) -> TemplateAccount {
    TemplateAccount {
        code,
        name,
        class,
        is_posting: true,
        parent_code: Some(parent_code),
    }
}

impl ChartTemplate for PksChartTemplate {
    fn name(&self) -> &'static str {
        "PKS-standard"
    }

    fn accounts(&self) -> Vec<TemplateAccount> {
        use AccountClass::*;

        vec![
            header("1", "ASET", Asset, None),
            header("11", "Aset Lancar", Asset, Some("1")),
            posting("1101", "Kas dan Bank", Asset, "11"),
            posting("1201", "Piutang Pinjaman Barang", Asset, "11"),
            header("13", "Persediaan", Asset, Some("11")),
            posting("1301", "Persediaan TBS", Asset, "13"),
            posting("1302", "Persediaan CPO", Asset, "13"),
            posting("1303", "Persediaan Kernel", Asset, "13"),
            posting("1304", "Persediaan Umum", Asset, "13"),
            header("2", "KEWAJIBAN", Liability, None),
            posting("2101", "Hutang Supplier TBS", Liability, "2"),
            posting("2102", "Hutang PPh 22", Liability, "2"),
            posting("2103", "Hutang Upah Bongkar", Liability, "2"),
            posting("2201", "Kliring Produksi", Liability, "2"),
            header("3", "EKUITAS", Equity, None),
            posting("3101", "Modal Disetor", Equity, "3"),
            posting("3201", "Laba Ditahan", Equity, "3"),
            header("4", "PENDAPATAN", Revenue, None),
            posting("4101", "Penjualan CPO", Revenue, "4"),
            posting("4102", "Penjualan Kernel", Revenue, "4"),
            header("5", "HARGA POKOK PENJUALAN", Cogs, None),
            posting("5101", "HPP CPO", Cogs, "5"),
            posting("5102", "HPP Kernel", Cogs, "5"),
            header("6", "BEBAN OPERASIONAL", Expense, None),
            posting("6101", "Beban Pemakaian Barang", Expense, "6"),
            posting("6102", "Beban Pemeliharaan", Expense, "6"),
            header("7", "PENDAPATAN LAIN-LAIN", OtherIncome, None),
            posting("7101", "Pendapatan Lain-lain", OtherIncome, "7"),
            posting("7102", "Selisih Lebih Persediaan", OtherIncome, "7"),
            header("8", "BEBAN LAIN-LAIN", OtherExpense, None),
            posting("8101", "Selisih Kurang Persediaan", OtherExpense, "8"),
        ]
    }

    fn system_accounts(&self) -> Vec<(SystemAccountKey, &'static str)> {
        use SystemAccountKey::*;

        vec![
            (InventoryTbs, "1301"),
            (InventoryCpo, "1302"),
            (InventoryKernel, "1303"),
            (InventoryGeneral, "1304"),
            (CogsCpo, "5101"),
            (CogsKernel, "5102"),
            (AccountsPayableSupplier, "2101"),
            (CashBank, "1101"),
            (Pph22Payable, "2102"),
            (UnloadWagesPayable, "2103"),
            (ProductionClearing, "2201"),
            (OtherIncome, "7101"),
            (InventoryAdjustmentLoss, "8101"),
            (InventoryAdjustmentGain, "7102"),
            (InventoryLoanReceivable, "1201"),
            (GeneralExpense, "6101"),
        ]
    }

    fn inventory_valuation_method(&self) -> &'static str {
        "AVCO"
    }
}
