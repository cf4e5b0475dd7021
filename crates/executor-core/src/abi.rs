//! Contract interfaces the executor encodes calls against.

use alloy_sol_types::sol;

sol! {
	/// ERC-20 transfer.
	function transfer(address to, uint256 amount) external returns (bool);

	/// A call executed by the delegation contract.
	#[derive(Debug)]
	struct Call {
		address to;
		uint256 value;
		bytes data;
	}

	/// Entry point of the delegation contract; runs `calls` in order and
	/// reverts all of them if any fails.
	function execute(Call[] calls) external payable;
}
