//! Generated client stubs for the coordination-service wire protocol:
//! KV (Range, Txn), Watch (bidirectional stream), Lease (Grant, Revoke,
//! bidirectional KeepAlive). Compiled from `proto/etcd.proto` by
//! `build.rs`.

tonic::include_proto!("etcdserverpb");
