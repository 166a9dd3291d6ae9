//! Solidity interface bindings for the escrow contract, generated via `alloy_sol_types::sol!`
//! the way the facilitator declares `IEIP3009`/`Validator6492`.

use alloy_sol_types::sol;

sol! {
    /// The escrow contract this relayer submits signed transfers against.
    #[sol(rpc)]
    interface IEscrow {
        /// Whether `nonce` has already been consumed by a transfer.
        function usedNonces(bytes32 nonce) external view returns (bool);

        /// Native-currency balance locked by `owner`.
        function lockedFundsETH(address owner) external view returns (uint256);

        /// ERC-20 balance of `token` locked by `owner`.
        function lockedFundsERC20(address token, address owner) external view returns (uint256);

        /// Unix timestamp at which `owner` initiated a withdrawal, or zero if none pending.
        function withdrawTimestamps(address owner) external view returns (uint256);

        /// The gas price the contract expects relayers to use for reimbursement accounting.
        function gasPrice() external view returns (uint256);

        /// Executes a signed native-currency transfer out of `from`'s locked balance.
        function executeETHTransfer(
            address from,
            address to,
            uint256 amount,
            bytes32 nonce,
            uint256 deadline,
            bytes calldata signature
        ) external returns (bool);

        /// Executes a signed ERC-20 transfer out of `from`'s locked balance.
        function executeERC20Transfer(
            address token,
            address from,
            address to,
            uint256 amount,
            bytes32 nonce,
            uint256 deadline,
            bytes calldata signature
        ) external returns (bool);
    }
}
