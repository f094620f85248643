// This file was generated; the real entry point lives in rsp2_tasks.
fn main() { rsp2_tasks::entry_points::rsp2_neb(); }
