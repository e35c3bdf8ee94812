/// Depth-first walk from `root`. `pre_recursion` returns the children to
/// visit together with data handed back to `post_recursion` once they are
/// done, so a node can record whether it was seen for the first time.
pub fn explore<Node, Ret, Data, I: IntoIterator<Item = Node>>(
    root: Node,
    mut pre_recursion: impl FnMut(&mut Node) -> (I, Data),
    mut post_recursion: impl FnMut(Node, Vec<Ret>, Data) -> Ret,
) -> Ret {
    explore_driver(root, &mut pre_recursion, &mut post_recursion)
}

fn explore_driver<Node, Ret, Data, I: IntoIterator<Item = Node>>(
    mut root: Node,
    pre_recursion: &mut impl FnMut(&mut Node) -> (I, Data),
    post_recursion: &mut impl FnMut(Node, Vec<Ret>, Data) -> Ret,
) -> Ret {
    let (children, data) = pre_recursion(&mut root);
    let child_rets = children
        .into_iter()
        .map(|todo| explore_driver(todo, pre_recursion, post_recursion))
        .collect();
    post_recursion(root, child_rets, data)
}
