use nexq_common::StageId;
use nexq_planner::{
    CollationKey, ExchangeSpec, ExchangeType, KeySelector, NodeId, PlanNode, ReceiveNode,
};

#[test]
fn receive_node_round_trips_through_json() {
    let node = PlanNode::Receive(ReceiveNode {
        id: NodeId(3),
        sender_stage_id: StageId(1),
        schema: None,
        spec: ExchangeSpec::hash_partitioned(KeySelector::new(vec![0, 1]))
            .with_receiver_sort(vec![CollationKey::asc(0), CollationKey::desc(2)]),
    });

    let s = serde_json::to_string(&node).unwrap();
    let back: PlanNode = serde_json::from_str(&s).unwrap();

    let PlanNode::Receive(back) = back else {
        panic!("expected receive node, got {}", back.explain());
    };
    assert_eq!(back.sender_stage_id, StageId(1));
    assert_eq!(back.spec.exchange_type(), ExchangeType::HashPartitioned);
    assert!(back.spec.sort_on_receiver());
    assert!(!back.spec.sort_on_sender());
    assert_eq!(back.spec.collation().len(), 2);
    assert_eq!(
        back.spec.key_selector().expect("selector").columns,
        vec![0, 1]
    );
}

#[test]
fn spec_json_does_not_carry_a_producer_subtree() {
    // The planning-only back-reference lives in PlanningContext; the
    // serialized node must stay flat.
    let node = PlanNode::Receive(ReceiveNode {
        id: NodeId(0),
        sender_stage_id: StageId(2),
        schema: None,
        spec: ExchangeSpec::singleton(),
    });
    let s = serde_json::to_string(&node).unwrap();
    assert!(!s.contains("producer"));
    assert!(!s.contains("sender_subtree"));
}
