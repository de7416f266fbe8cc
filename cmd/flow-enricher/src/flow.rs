/// Generated enriched-flow wire schema.
pub mod flowpb {
    include!(concat!(env!("OUT_DIR"), "/flowpb.rs"));
}
